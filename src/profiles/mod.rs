//! ANT+ device profiles: each implements `ChannelInterface` against a shared
//! [`crate::data`] record, matching the wire formats in
//! `libantplus.plus.{hrm,scs,fe}` and the Tacx vendor extension in
//! `libantplus.tacx.bushido`.

pub mod bushido;
pub mod fe;
pub mod hrm;
pub mod scs;
