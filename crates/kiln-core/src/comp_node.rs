use std::fmt;
use std::str::FromStr;

use crate::error::KilnError;

/// Physical device family behind a [`CompNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceKind {
    #[default]
    Cpu,
    Gpu,
}

/// Computing node a value lives on, written as a locator like `cpu0` or `gpu1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CompNode {
    kind: DeviceKind,
    index: u32,
}

impl CompNode {
    pub const fn new(kind: DeviceKind, index: u32) -> Self {
        Self { kind, index }
    }

    pub const fn cpu(index: u32) -> Self {
        Self::new(DeviceKind::Cpu, index)
    }

    pub const fn gpu(index: u32) -> Self {
        Self::new(DeviceKind::Gpu, index)
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for CompNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Cpu => write!(f, "cpu{}", self.index),
            DeviceKind::Gpu => write!(f, "gpu{}", self.index),
        }
    }
}

impl FromStr for CompNode {
    type Err = KilnError;

    /// Accepts `cpu`, `cpuN`, `gpuN` and `cudaN`; a missing index means 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KilnError::InvalidCompNode(s.to_string());
        let (kind, rest) = if let Some(rest) = s.strip_prefix("cpu") {
            (DeviceKind::Cpu, rest)
        } else if let Some(rest) = s.strip_prefix("gpu") {
            (DeviceKind::Gpu, rest)
        } else if let Some(rest) = s.strip_prefix("cuda") {
            (DeviceKind::Gpu, rest)
        } else {
            return Err(invalid());
        };
        let index = if rest.is_empty() {
            0
        } else {
            rest.parse::<u32>().map_err(|_| invalid())?
        };
        Ok(Self::new(kind, index))
    }
}
