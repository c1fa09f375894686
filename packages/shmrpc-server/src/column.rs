//! TypedColumnView - typed, read-only access to one column of worker output

use serde::Serialize;

use crate::schema::ElementType;

/// Value read from a column, widened to a canonical type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Int(i64),
    Float(f64),
}

/// View over `len` packed elements of one type.
///
/// Borrows the algorithm's buffer; it cannot outlive the registry read
/// guard the algorithm state was obtained from. Indexing outside
/// `0..len` panics.
#[derive(Debug, Clone, Copy)]
pub struct TypedColumnView<'a> {
    bytes: &'a [u8],
    element_type: ElementType,
    len: usize,
}

impl<'a> TypedColumnView<'a> {
    /// `bytes` must be exactly `len * element_type.size()` long; only the
    /// schema resolver constructs views.
    pub(crate) fn new(bytes: &'a [u8], element_type: ElementType, len: usize) -> Self {
        debug_assert_eq!(bytes.len(), len * element_type.size());
        Self { bytes, element_type, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Raw bytes of element `index`.
    fn element(&self, index: usize) -> &'a [u8] {
        assert!(
            index < self.len,
            "column index {} out of range 0..{}",
            index,
            self.len
        );
        let size = self.element_type.size();
        &self.bytes[index * size..(index + 1) * size]
    }

    pub fn get(&self, index: usize) -> ColumnValue {
        let raw = self.element(index);
        match self.element_type {
            ElementType::F32 => ColumnValue::Float(f32::from_ne_bytes(fixed(raw)) as f64),
            ElementType::F64 => ColumnValue::Float(f64::from_ne_bytes(fixed(raw))),
            ElementType::I32 => ColumnValue::Int(i32::from_ne_bytes(fixed(raw)) as i64),
            ElementType::I64 => ColumnValue::Int(i64::from_ne_bytes(fixed(raw))),
            ElementType::U8 => ColumnValue::Int(raw[0] as i64),
        }
    }

    /// Integral value at `index`; `None` for floating columns.
    pub fn get_int64(&self, index: usize) -> Option<i64> {
        match self.get(index) {
            ColumnValue::Int(v) => Some(v),
            ColumnValue::Float(_) => None,
        }
    }

    /// Whether elements `i` and `j` hold the same value.
    ///
    /// Compares the stored bytes, so floating values must match bit for bit.
    pub fn equal(&self, i: usize, j: usize) -> bool {
        self.element(i) == self.element(j)
    }
}

fn fixed<const N: usize>(raw: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(raw);
    out
}

#[cfg(test)]
mod column_tests {
    use super::*;

    fn i64_bytes(values: &[i64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    #[test]
    fn test_get_i64() {
        let bytes = i64_bytes(&[7, -3, 7]);
        let view = TypedColumnView::new(&bytes, ElementType::I64, 3);

        assert_eq!(view.get(1), ColumnValue::Int(-3));
        assert_eq!(view.get_int64(2), Some(7));
        assert_eq!(view.len(), 3);
    }

    #[test]
    fn test_get_i32_sign_extends() {
        let bytes: Vec<u8> = [-1i32, 5].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let view = TypedColumnView::new(&bytes, ElementType::I32, 2);
        assert_eq!(view.get(0), ColumnValue::Int(-1));
        assert_eq!(view.get(1), ColumnValue::Int(5));
    }

    #[test]
    fn test_get_byte_and_floats() {
        let bytes = vec![0xffu8, 3];
        let view = TypedColumnView::new(&bytes, ElementType::U8, 2);
        assert_eq!(view.get(0), ColumnValue::Int(255));

        let bytes: Vec<u8> = [0.5f32, 1.25].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let view = TypedColumnView::new(&bytes, ElementType::F32, 2);
        assert_eq!(view.get(1), ColumnValue::Float(1.25));
        assert_eq!(view.get_int64(1), None);
    }

    #[test]
    fn test_equal_is_exact() {
        let bytes = i64_bytes(&[4, 4, 5]);
        let view = TypedColumnView::new(&bytes, ElementType::I64, 3);
        assert!(view.equal(0, 1));
        assert!(!view.equal(1, 2));
        assert!(view.equal(2, 2));
    }

    #[test]
    fn test_float_equal_is_bitwise() {
        // 0.0 and -0.0 compare equal as floats but differ in bits
        let bytes: Vec<u8> = [0.0f64, -0.0, 0.0].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let view = TypedColumnView::new(&bytes, ElementType::F64, 3);
        assert!(!view.equal(0, 1));
        assert!(view.equal(0, 2));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_panics() {
        let bytes = i64_bytes(&[1, 2]);
        let view = TypedColumnView::new(&bytes, ElementType::I64, 2);
        view.get(2);
    }
}
