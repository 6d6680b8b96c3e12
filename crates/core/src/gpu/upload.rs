//! Typed CPU-writable GPU buffers.

use std::marker::PhantomData;
use std::num::NonZeroU64;

use bytemuck::Pod;

use crate::error::{Result, WaveError};

/// Round a constant element up to the 256-byte uniform offset alignment.
#[must_use]
pub const fn constant_buffer_byte_size(byte_size: u64) -> u64 {
    (byte_size + 255) & !255
}

/// Array of `T` the CPU rewrites every frame.
///
/// Constant buffers pad each element to 256 bytes so any element can be
/// bound on its own; vertex/storage buffers are tightly packed.
pub struct UploadBuffer<T: Pod> {
    buffer: wgpu::Buffer,
    label: &'static str,
    len: usize,
    stride: u64,
    _marker: PhantomData<T>,
}

impl<T: Pod> UploadBuffer<T> {
    /// Allocate `len` elements.
    ///
    /// # Errors
    /// `InvalidParameter` for an empty buffer.
    pub fn new(
        device: &wgpu::Device,
        label: &'static str,
        len: usize,
        is_constant_buffer: bool,
    ) -> Result<Self> {
        if len == 0 {
            return Err(WaveError::invalid_parameter(
                "len",
                format!("upload buffer `{label}` needs at least one element"),
            ));
        }

        let element = std::mem::size_of::<T>() as u64;
        let (stride, usage) = if is_constant_buffer {
            (
                constant_buffer_byte_size(element),
                wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            )
        } else {
            (
                element,
                wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST,
            )
        };

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: stride * len as u64,
            usage,
            mapped_at_creation: false,
        });

        Ok(Self {
            buffer,
            label,
            len,
            stride,
            _marker: PhantomData,
        })
    }

    /// Overwrite element `index`.
    ///
    /// # Errors
    /// `IndexOutOfRange` past the end of the buffer.
    pub fn copy_data(&self, queue: &wgpu::Queue, index: usize, data: &T) -> Result<()> {
        self.check(index, 1)?;
        queue.write_buffer(
            &self.buffer,
            index as u64 * self.stride,
            bytemuck::bytes_of(data),
        );
        Ok(())
    }

    /// Overwrite `data.len()` consecutive elements starting at `start`.
    ///
    /// Only valid for packed buffers; constant buffers go element by element.
    ///
    /// # Errors
    /// `IndexOutOfRange` if the range runs past the end.
    pub fn copy_slice(&self, queue: &wgpu::Queue, start: usize, data: &[T]) -> Result<()> {
        if self.stride != std::mem::size_of::<T>() as u64 {
            for (offset, element) in data.iter().enumerate() {
                self.copy_data(queue, start + offset, element)?;
            }
            return Ok(());
        }
        self.check(start, data.len())?;
        queue.write_buffer(
            &self.buffer,
            start as u64 * self.stride,
            bytemuck::cast_slice(data),
        );
        Ok(())
    }

    fn check(&self, start: usize, count: usize) -> Result<()> {
        let end = start.checked_add(count).unwrap_or(usize::MAX);
        if end > self.len {
            return Err(WaveError::IndexOutOfRange {
                buffer: self.label,
                index: end - 1,
                len: self.len,
            });
        }
        Ok(())
    }

    /// Binding covering element `index` only.
    ///
    /// # Errors
    /// `IndexOutOfRange` past the end of the buffer.
    pub fn binding(&self, index: usize) -> Result<wgpu::BufferBinding<'_>> {
        self.check(index, 1)?;
        Ok(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: index as u64 * self.stride,
            size: NonZeroU64::new(std::mem::size_of::<T>() as u64),
        })
    }

    /// Underlying buffer.
    #[must_use]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Element count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; empty buffers are rejected at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes between consecutive elements.
    #[must_use]
    pub fn stride(&self) -> u64 {
        self.stride
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_buffer_alignment() {
        assert_eq!(constant_buffer_byte_size(0), 0);
        assert_eq!(constant_buffer_byte_size(1), 256);
        assert_eq!(constant_buffer_byte_size(144), 256);
        assert_eq!(constant_buffer_byte_size(256), 256);
        assert_eq!(constant_buffer_byte_size(257), 512);
    }

    #[test]
    fn test_index_checks() {
        let Ok(ctx) = crate::gpu::create_gpu_context_blocking() else {
            eprintln!("GPU context creation skipped: no adapter");
            return;
        };

        let buffer = UploadBuffer::<[f32; 4]>::new(ctx.device(), "test", 3, true).unwrap();
        assert_eq!(buffer.stride(), 256);
        assert_eq!(buffer.buffer().size(), 768);

        buffer.copy_data(ctx.queue(), 2, &[1.0; 4]).unwrap();
        assert!(matches!(
            buffer.copy_data(ctx.queue(), 3, &[1.0; 4]),
            Err(WaveError::IndexOutOfRange {
                index: 3,
                len: 3,
                ..
            })
        ));

        let packed = UploadBuffer::<[f32; 4]>::new(ctx.device(), "packed", 4, false).unwrap();
        packed.copy_slice(ctx.queue(), 1, &[[0.5; 4]; 3]).unwrap();
        assert!(packed.copy_slice(ctx.queue(), 2, &[[0.5; 4]; 3]).is_err());
    }
}
