//! Exception cause codes and event vector numbers.

/// SSR.CAUSE for interrupt line 0; line `n` uses `INT0 + n`.
pub const INT0: u8 = 0xc0;

/// TLB miss on instruction fetch.
pub const TLB_MISS_X: u8 = 0x60;
/// TLB miss on data read.
pub const TLB_MISS_R: u8 = 0x70;
/// TLB miss on data write.
pub const TLB_MISS_W: u8 = 0x71;

pub const FETCH_NO_XPAGE: u8 = 0x11;
pub const FETCH_NO_UPAGE: u8 = 0x12;
pub const PRIV_NO_READ: u8 = 0x22;
pub const PRIV_NO_WRITE: u8 = 0x23;
pub const PRIV_NO_UREAD: u8 = 0x24;
pub const PRIV_NO_UWRITE: u8 = 0x25;

/// Event number of the reset vector.
pub const EVENT_RESET: u32 = 0;
/// Event number of interrupt line 0.
pub const EVENT_INT0: u32 = 16;

#[inline]
pub const fn interrupt_cause(line: u8) -> u8 {
    INT0 + line
}

/// Address of the handler for `event` given the exception vector base.
#[inline]
pub const fn event_vector(evb: u32, event: u32) -> u32 {
    evb | (event << 2)
}

#[inline]
pub const fn interrupt_vector(evb: u32, line: u8) -> u32 {
    event_vector(evb, EVENT_INT0 + line as u32)
}
