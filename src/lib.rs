// Lock-free singly-linked list with MVCC snapshot isolation and buffered
// transactions. Unsafe-heavy by nature (hazard-pointer reclamation over
// raw pointers); the clippy config below keeps lints relevant to that.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::type_complexity)]

mod handle;
mod iter;
mod list;
mod node;
mod registry;
mod transaction;

pub use handle::ElementHandle;
pub use iter::ListIter;
pub use list::ConcurrentList;
pub use transaction::Transaction;
