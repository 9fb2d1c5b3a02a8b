use std::sync::Arc;

use kiln_core::{CompNode, DType, KilnError, Result, TensorShape};

/// Where a value's data currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Resident,
    /// Moved out of the working set; usable again after `swap_in`.
    SwappedOut,
    /// Data discarded; only metadata remains.
    Dropped,
}

/// One value owned by the host channel.
///
/// Data is reference-counted so kernels can read it after the channel's
/// lock is released.
#[derive(Debug, Clone)]
pub struct HostValue {
    data: Option<Arc<Vec<f32>>>,
    dtype: DType,
    device: CompNode,
    shape: TensorShape,
    residency: Residency,
}

impl HostValue {
    /// Checks that `data` fills `shape` exactly.
    pub fn new(data: Vec<f32>, shape: TensorShape, dtype: DType, device: CompNode) -> Result<Self> {
        let expected = shape.total_nr_elems();
        if data.len() != expected {
            return Err(KilnError::ShapeMismatch {
                expected: shape,
                got: TensorShape::new(&[data.len()]),
            });
        }
        Ok(Self {
            data: Some(Arc::new(data)),
            dtype,
            device,
            shape,
            residency: Residency::Resident,
        })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> CompNode {
        self.device
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn numel(&self) -> usize {
        self.shape.total_nr_elems()
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// The data, if it is resident.
    pub fn data(&self) -> Result<&[f32]> {
        match (&self.data, self.residency) {
            (Some(data), Residency::Resident) => Ok(data.as_slice()),
            (_, residency) => Err(KilnError::Backend(format!(
                "value is not resident ({residency:?})"
            ))),
        }
    }

    pub fn shared_data(&self) -> Result<Arc<Vec<f32>>> {
        self.data()?;
        self.data
            .clone()
            .ok_or_else(|| KilnError::Backend("value has no data".into()))
    }

    pub fn swap_out(&mut self) {
        if self.residency == Residency::Resident {
            self.residency = Residency::SwappedOut;
        }
    }

    pub fn swap_in(&mut self) -> Result<()> {
        match self.residency {
            Residency::Dropped => Err(KilnError::Backend(
                "cannot swap in a dropped value".into(),
            )),
            _ => {
                self.residency = Residency::Resident;
                Ok(())
            }
        }
    }

    pub fn drop_data(&mut self) {
        self.data = None;
        self.residency = Residency::Dropped;
    }
}
