/// Element type of a column. The type is a semantic attribute: codecs pick
/// their on-disk encoding from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Dense homogeneous storage for one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! for_each_variant {
    ($self:expr, $data:ident => $body:expr) => {
        match $self {
            ColumnData::I8($data) => $body,
            ColumnData::U8($data) => $body,
            ColumnData::I16($data) => $body,
            ColumnData::U16($data) => $body,
            ColumnData::I32($data) => $body,
            ColumnData::U32($data) => $body,
            ColumnData::F32($data) => $body,
            ColumnData::F64($data) => $body,
        }
    };
}

impl ColumnData {
    pub fn zeroed(ty: ScalarType, len: usize) -> Self {
        match ty {
            ScalarType::I8 => Self::I8(vec![0; len]),
            ScalarType::U8 => Self::U8(vec![0; len]),
            ScalarType::I16 => Self::I16(vec![0; len]),
            ScalarType::U16 => Self::U16(vec![0; len]),
            ScalarType::I32 => Self::I32(vec![0; len]),
            ScalarType::U32 => Self::U32(vec![0; len]),
            ScalarType::F32 => Self::F32(vec![0.0; len]),
            ScalarType::F64 => Self::F64(vec![0.0; len]),
        }
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Self::I8(_) => ScalarType::I8,
            Self::U8(_) => ScalarType::U8,
            Self::I16(_) => ScalarType::I16,
            Self::U16(_) => ScalarType::U16,
            Self::I32(_) => ScalarType::I32,
            Self::U32(_) => ScalarType::U32,
            Self::F32(_) => ScalarType::F32,
            Self::F64(_) => ScalarType::F64,
        }
    }

    pub fn len(&self) -> usize {
        for_each_variant!(self, data => data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All admitted element types fit an f64 exactly, so a lossless f64 view
    /// is the universal accessor.
    pub fn get(&self, index: usize) -> f64 {
        for_each_variant!(self, data => data[index] as f64)
    }

    pub fn set(&mut self, index: usize, value: f64) {
        // `as` saturates on out-of-range floats, which is what row-level
        // writes of mismatched values want.
        match self {
            Self::I8(data) => data[index] = value as i8,
            Self::U8(data) => data[index] = value as u8,
            Self::I16(data) => data[index] = value as i16,
            Self::U16(data) => data[index] = value as u16,
            Self::I32(data) => data[index] = value as i32,
            Self::U32(data) => data[index] = value as u32,
            Self::F32(data) => data[index] = value as f32,
            Self::F64(data) => data[index] = value,
        }
    }

    /// Gather `self[indices[i]]` into a new buffer of the same type.
    pub fn gather(&self, indices: &[usize]) -> Self {
        match self {
            Self::I8(data) => Self::I8(indices.iter().map(|&i| data[i]).collect()),
            Self::U8(data) => Self::U8(indices.iter().map(|&i| data[i]).collect()),
            Self::I16(data) => Self::I16(indices.iter().map(|&i| data[i]).collect()),
            Self::U16(data) => Self::U16(indices.iter().map(|&i| data[i]).collect()),
            Self::I32(data) => Self::I32(indices.iter().map(|&i| data[i]).collect()),
            Self::U32(data) => Self::U32(indices.iter().map(|&i| data[i]).collect()),
            Self::F32(data) => Self::F32(indices.iter().map(|&i| data[i]).collect()),
            Self::F64(data) => Self::F64(indices.iter().map(|&i| data[i]).collect()),
        }
    }

    /// Copy all of `src` into `self` starting at `offset`. Both columns must
    /// have the same element type.
    pub fn copy_region(&mut self, offset: usize, src: &Self) {
        match (self, src) {
            (Self::I8(dst), Self::I8(src)) => dst[offset..offset + src.len()].copy_from_slice(src),
            (Self::U8(dst), Self::U8(src)) => dst[offset..offset + src.len()].copy_from_slice(src),
            (Self::I16(dst), Self::I16(src)) => dst[offset..offset + src.len()].copy_from_slice(src),
            (Self::U16(dst), Self::U16(src)) => dst[offset..offset + src.len()].copy_from_slice(src),
            (Self::I32(dst), Self::I32(src)) => dst[offset..offset + src.len()].copy_from_slice(src),
            (Self::U32(dst), Self::U32(src)) => dst[offset..offset + src.len()].copy_from_slice(src),
            (Self::F32(dst), Self::F32(src)) => dst[offset..offset + src.len()].copy_from_slice(src),
            (Self::F64(dst), Self::F64(src)) => dst[offset..offset + src.len()].copy_from_slice(src),
            _ => panic!("Mismatched column types in copy_region"),
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Self::F32(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<&[u32]> {
        match self {
            Self::U32(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            Self::U8(data) => Some(data),
            _ => None,
        }
    }
}

/// A named typed column. `data.len()` is the column's row count.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f64_view_is_lossless_for_u32() {
        let col = ColumnData::U32(vec![0, 1, u32::MAX]);
        assert_eq!(col.get(2), u32::MAX as f64);
    }

    #[test]
    fn set_saturates() {
        let mut col = ColumnData::U8(vec![0]);
        col.set(0, 300.0);
        assert_eq!(col.get(0), 255.0);
        col.set(0, -5.0);
        assert_eq!(col.get(0), 0.0);
    }

    #[test]
    fn gather_selects() {
        let col = ColumnData::F32(vec![1.0, 2.0, 3.0, 4.0]);
        let picked = col.gather(&[3, 1]);
        assert_eq!(picked, ColumnData::F32(vec![4.0, 2.0]));
    }
}
