#[cfg(feature = "defmt")]
use defmt::Format;

/// Indicates that the `DW1000` instance is not initialized yet
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Uninitialized;

/// Indicates that the `DW1000` instance is ready to be used
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Ready;

/// Any state in which the register interface can be used
pub trait Awake {}

impl Awake for Uninitialized {}
impl Awake for Ready {}
