//! Convenience macros for KNX addresses.

/// Creates a [`GroupAddress`](crate::addressing::GroupAddress) from 3-level
/// notation, validated at compile time.
///
/// ```
/// use knx_link::ga;
///
/// let light = ga!(1/1/1);
/// assert_eq!(light.raw(), 0x0901);
/// ```
///
/// Out-of-range components fail to compile:
///
/// ```compile_fail
/// # use knx_link::ga;
/// let addr = ga!(32/0/0);
/// ```
#[macro_export]
macro_rules! ga {
    ($main:literal / $middle:literal / $sub:literal) => {{
        const _: () = {
            if $main > 31 {
                panic!("main group must be 0-31");
            }
            if $middle > 7 {
                panic!("middle group must be 0-7");
            }
            if $sub > 255 {
                panic!("sub group must be 0-255");
            }
        };
        $crate::addressing::GroupAddress::from(
            (($main as u16 & 0x1F) << 11) | (($middle as u16 & 0x07) << 8) | ($sub as u16 & 0xFF),
        )
    }};
}

/// Creates an [`IndividualAddress`](crate::addressing::IndividualAddress)
/// from its components, validated at compile time.
///
/// ```
/// use knx_link::ia;
///
/// let device = ia!(1, 1, 5);
/// assert_eq!(device.raw(), 0x1105);
/// ```
#[macro_export]
macro_rules! ia {
    ($area:literal, $line:literal, $device:literal) => {{
        const _: () = {
            if $area > 15 {
                panic!("area must be 0-15");
            }
            if $line > 15 {
                panic!("line must be 0-15");
            }
            if $device > 255 {
                panic!("device must be 0-255");
            }
        };
        $crate::addressing::IndividualAddress::from(
            (($area as u16 & 0x0F) << 12) | (($line as u16 & 0x0F) << 8) | ($device as u16 & 0xFF),
        )
    }};
}
