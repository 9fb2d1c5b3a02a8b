use std::fmt;
use std::str::FromStr;

use crate::error::KilnError;

/// Element types a channel may report for a value.
///
/// The runtime never inspects element data; a dtype is metadata that channels
/// and graph variables report and that kernels check operands against. Parsed
/// from either the long name (`"float32"`) or the short one (`"f32"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit IEEE float; the type the host kernels compute in.
    Float32,
    /// 16-bit IEEE half precision.
    Float16,
    /// 16-bit brain float: f32 exponent range, 8-bit mantissa.
    BFloat16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer.
    Uint8,
    /// One byte per element, zero or one.
    Bool,
}

impl DType {
    /// Size in bytes of one element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::Float32 | DType::Int32 => 4,
            DType::Float16 | DType::BFloat16 | DType::Int16 => 2,
            DType::Int8 | DType::Uint8 | DType::Bool => 1,
        }
    }

    /// True for the floating point types, the only ones gradients flow through.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float32 | DType::Float16 | DType::BFloat16)
    }

    /// True for signed and unsigned integers. `Bool` is neither float nor
    /// integer.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DType::Int32 | DType::Int16 | DType::Int8 | DType::Uint8
        )
    }

    /// Canonical lowercase name, as printed by `Display` and accepted by
    /// `FromStr`.
    pub fn name(&self) -> &'static str {
        match self {
            DType::Float32 => "float32",
            DType::Float16 => "float16",
            DType::BFloat16 => "bfloat16",
            DType::Int32 => "int32",
            DType::Int16 => "int16",
            DType::Int8 => "int8",
            DType::Uint8 => "uint8",
            DType::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dtype = match s {
            "float32" | "f32" => DType::Float32,
            "float16" | "f16" => DType::Float16,
            "bfloat16" | "bf16" => DType::BFloat16,
            "int32" | "i32" => DType::Int32,
            "int16" | "i16" => DType::Int16,
            "int8" | "i8" => DType::Int8,
            "uint8" | "u8" => DType::Uint8,
            "bool" => DType::Bool,
            other => return Err(KilnError::Config(format!("unknown dtype `{other}`"))),
        };
        Ok(dtype)
    }
}
