//! SBS (BaseStation) text format (§4.7): comma-separated `MSG` records
//! consumed by virtual-radar clients, plus a line-oriented reader for
//! ingesting an upstream MLAT-tagged SBS feed.

mod decode;
mod encode;

pub use decode::{Message, MessageParseError, Reader};
pub use encode::encode_message;
