//! Chunk swarm protocol reference implementation.
//! No I/O: hosts read sockets and files, pass payloads in, and act on the returned values.

pub mod chunk;
pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod wire;

pub use chunk::{ChunkPlan, ChunkSpan, ResultTable, DEFAULT_CHUNK_SIZE, MAX_FILE_LEN};
pub use liveness::{EvictReason, LivenessAction, LivenessMonitor, LivenessState};
pub use protocol::{Control, PeerAddr, PeerRecord, PeerRequest, ProtocolError, QueryReply};
pub use registry::{Registered, Registry};
pub use scheduler::{Claim, WorkQueue};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
