//! Vertex format of the presentation quad
//!
//! The quad covers normalized device coordinates `[-1, 1]` in both axes. The
//! vertex shader derives texture coordinates from the position, so the
//! vertex carries only a position and a tint color.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

/// Quad vertex: position (2 floats) + color (3 floats)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Position in normalized device coordinates
    pub pos: [f32; 2],
    /// Tint multiplied with the sampled pixel color
    pub color: [f32; 3],
}

impl Vertex {
    /// Create a vertex
    pub const fn new(pos: [f32; 2], color: [f32; 3]) -> Self {
        Self { pos, color }
    }

    /// Vulkan vertex input binding description
    ///
    /// One interleaved buffer at binding 0, advanced per vertex.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Vulkan vertex input attribute descriptions
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            // Position attribute (location = 0)
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, pos) as u32,
            },
            // Color attribute (location = 1)
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, color) as u32,
            },
        ]
    }
}

const WHITE: [f32; 3] = [1.0, 1.0, 1.0];

/// Corners of the full-window quad, clockwise from the top-left
pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new([-1.0, -1.0], WHITE),
    Vertex::new([1.0, -1.0], WHITE),
    Vertex::new([1.0, 1.0], WHITE),
    Vertex::new([-1.0, 1.0], WHITE),
];

/// Two triangles over [`QUAD_VERTICES`]
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_stride_matches_layout() {
        let binding = Vertex::binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 20);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn test_attribute_offsets() {
        let [pos, color] = Vertex::attribute_descriptions();
        assert_eq!((pos.location, pos.offset, pos.format), (0, 0, vk::Format::R32G32_SFLOAT));
        assert_eq!((color.location, color.offset, color.format), (1, 8, vk::Format::R32G32B32_SFLOAT));
        assert_eq!(pos.binding, color.binding);
    }

    #[test]
    fn test_quad_bytes_are_tightly_packed() {
        let bytes: &[u8] = bytemuck::cast_slice(&QUAD_VERTICES);
        assert_eq!(bytes.len(), 4 * 20);
        // Second vertex starts right after the first one's color
        let second_x = f32::from_ne_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        assert_eq!(second_x, 1.0);
    }

    #[test]
    fn test_quad_indices_reference_all_corners() {
        let mut seen = [false; 4];
        for index in QUAD_INDICES {
            seen[usize::from(index)] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }
}
