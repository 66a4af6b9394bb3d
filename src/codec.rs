//! Wire codecs for both daemon protocol variants.
//!
//! Pure encode/decode functions: typed commands to wire bytes and wire
//! bytes to typed responses/notifications. No I/O happens here; the
//! client layer owns the sockets and feeds these decoders resumably
//! across partial TCP reads.

pub mod current;
pub mod legacy;
pub mod report;
