// implementation of the millrace channel.
//
// the basic architecture is as such:
//
// channel handles wrap around Arc<Mutex<shared state>>
//                                         |
//          /------------------------------/
//          v
//       shared state
//          |
//          |------ it contains a VecDeque<T> holding the buffered values. the front of the
//          |       deque is what the next read consumes; "give back" pushes there, ordinary
//          |       writes push at the back.
//          |
//          |------ it contains a "pending readers" queue:
//          |
//          |       a FIFO queue of waiter records for suspended read calls. each record is a
//          |       oneshot sender that is either fulfilled with a value or failed with the
//          |       close reason, never both -- sending consumes the sender.
//          |
//          |------ it contains a "pending writers" queue, which is the same idea for suspended
//          |       write calls, fulfilled with a write grant instead of a value.
//          |
//          \------ it contains the matching-pass guards and the count of outstanding write
//                  grants, which hold buffer slots until spent or dropped.
//
// state changes that could pair a waiter with a value or a free slot request a "matching pass",
// a task submitted to the process-wide scheduler (crate::scheduler). the scheduler serializes
// passes and turns chains of match-triggers-match into an iterative drain, so resolution never
// recurses.
//
// the organization of these modules is as such:
//
//      core: owns the shared state and the matching algorithm. everything here is
//      ^     crate-private and returns raw results.
//      |
//      api: wrapper around core that presents the convenient, documented API the crate
//           re-exports publically.
//
// there is also the error module, which contains the relevant error types, which is also
// re-exported publically.

pub(crate) mod error;
pub(crate) mod api;

mod core;
