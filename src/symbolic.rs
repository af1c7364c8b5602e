//! Symbolic block representation.

use crate::block_size::{BLOCK_MAX_PARTITIONS, BLOCK_MAX_WEIGHTS};
use crate::color::EndpointFormat;
use crate::quant::QuantMethod;

/// A non-constant block in unpacked form.
#[derive(Clone)]
pub(crate) struct NonConstBlock {
    /// Number of partitions, 1..=4.
    pub partition_count: u8,
    /// Partition seed; meaningful for 2 or more partitions.
    pub partition_index: u16,
    /// Physical block mode index.
    pub block_mode: u16,
    /// Color endpoint quantization level.
    pub quant_mode: QuantMethod,
    /// Endpoint format per partition.
    pub color_formats: [EndpointFormat; BLOCK_MAX_PARTITIONS],
    /// Quantized endpoint values per partition.
    pub color_values: [[u8; 8]; BLOCK_MAX_PARTITIONS],
    /// The component carried by the second weight plane, if any.
    pub plane2_component: Option<u8>,
    /// Quantized weight-grid values; plane 2 starts at
    /// [`crate::block_size::WEIGHTS_PLANE2_OFFSET`].
    pub weights: [u8; BLOCK_MAX_WEIGHTS],
    /// The weighted error of this encoding, tracked by the compressor.
    /// Not part of the serialized form.
    pub errorval: f32,
}

impl NonConstBlock {
    pub fn color_formats_matched(&self) -> bool {
        let count = self.partition_count as usize;
        self.color_formats[..count]
            .iter()
            .all(|&f| f == self.color_formats[0])
    }
}

/// A compressed block in symbolic form: the unpacked content of one
/// 128-bit physical block.
#[derive(Clone)]
pub(crate) enum SymbolicBlock {
    /// Not a valid encoding; decodes to the error color.
    Error,
    /// Constant color stored as four FP16 bit patterns.
    ConstF16([u16; 4]),
    /// Constant color stored as four UNORM16 values.
    ConstU16([u16; 4]),
    /// A normal block.
    NonConst(Box<NonConstBlock>),
}

impl SymbolicBlock {
    pub fn is_error(&self) -> bool {
        matches!(self, SymbolicBlock::Error)
    }
}
