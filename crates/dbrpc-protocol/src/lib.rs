pub mod backend;
pub mod codec;
pub mod frontend;
pub mod messages;

pub use codec::{Wire, MAX_FRAME_LEN, PROTOCOL_VERSION};
pub use messages::{ColumnValue, CursorRequest, Procedure, Reply, Request, Status};
