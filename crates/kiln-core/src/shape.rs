use smallvec::SmallVec;
use std::fmt;

/// Tensor shape, stack-allocated up to 4 dimensions.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct TensorShape {
    dims: SmallVec<[usize; 4]>,
}

impl TensorShape {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// 0-dimensional shape.
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Total element count; a scalar holds one element.
    pub fn total_nr_elems(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Whether any dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(|&d| d == 0)
    }
}

impl From<&[usize]> for TensorShape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims)
    }
}

impl<const N: usize> From<[usize; N]> for TensorShape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(&dims)
    }
}

impl fmt::Debug for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TensorShape{}", self)
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        if self.dims.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar() {
        let s = TensorShape::scalar();
        assert!(s.is_scalar());
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.total_nr_elems(), 1);
    }

    #[test]
    fn test_elems_and_empty() {
        let s = TensorShape::from([2, 3, 4]);
        assert_eq!(s.total_nr_elems(), 24);
        assert!(!s.is_empty());
        assert!(TensorShape::from([4, 0]).is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(TensorShape::from([2, 3]).to_string(), "(2, 3)");
        assert_eq!(TensorShape::from([5]).to_string(), "(5,)");
        assert_eq!(TensorShape::scalar().to_string(), "()");
    }
}
