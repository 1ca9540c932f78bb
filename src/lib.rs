//! Bulk-state-transfer protocol for shipping a large, multi-region in-memory
//!  snapshot from a producer to a consumer over a message-oriented, reliable,
//!  ordered transport. It underlies a backup mechanism for a key-value store:
//!  the producer periodically discovers that a snapshot must be shipped, drains
//!  it through a bounded-size message channel in three strictly ordered phases,
//!  and the consumer reassembles each phase into a freshly allocated
//!  destination buffer before releasing it to the snapshot consumer.
//!
//! ## Message flow
//!
//! The client is strictly single-outstanding per connection: it sends one
//!  request and waits for the paired response before deciding what to send
//!  next.
//!
//! ```ascii
//! client                                  server
//!   | -- beacon request ----------------->  |
//!   | <-------------------- beacon response |      (idle: repeat while the
//!   |                                       |       pending-work signal is empty)
//!   | -- queue data step 1 start sending -> |      (signal non-empty: phase 1 begins)
//!   | <-------------------- beacon response |
//!   | -- queue data step 1 sending -------> |
//!   |                 ...                   |
//!   | -- queue data step 1 sending final -> |      (phase 2, then phase 3, follow)
//!   |                 ...                   |
//!   | -- queue data step 3 sending final -> |
//!   | <-------------------- beacon response |      (back to beacon mode)
//! ```
//!
//! ## Wire grammar
//!
//! The tag is the sole carrier of protocol state; there is no separate metadata
//!  record, and the payload length is taken from the transport frame. The fixed
//!  vocabulary (exact, case-sensitive):
//!
//! * `"beacon request header"` / `"beacon response header"` - the idle-mode
//!   keepalive exchange used to detect pending work
//! * `"queue data step {N}{ start} sending{ final}"` with `N` in 1..=3 -
//!   a data chunk; `start` marks the first chunk of a phase, `final` the last
//!   one, a single-chunk phase carries both
//!
//! Each phase is bound to one named snapshot region with a declared total size
//!  that both sides know from configuration; the region is sliced into chunks
//!  of at most [`config::MAX_CHUNK_SIZE`] bytes and reassembled at the matching
//!  destination offset on the receiver.
//!
//! ## Sessions
//!
//! Each session runs its message exchange on a dedicated task, so the sender
//!  cursor and the receiver assembler are single-threaded per connection and
//!  need no locking. The server serves at most one inbound connection at a
//!  time; the client caps concurrently active outbound sessions. Cancellation
//!  is coarse: tearing down a connection abandons in-flight phase state, and a
//!  retry restarts the affected phase from its start tag.
//!
//! The transport, the destination-buffer allocator, the pending-work signal
//!  and the region loader are external collaborators behind traits; this crate
//!  only relies on the transport being reliable, ordered and message-oriented.

pub mod alloc;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod pending;
pub mod receiver;
pub mod region;
pub mod sender;
pub mod server;
pub mod session;
pub mod wire;
