//! Reflection-driven constant buffers with dirty tracking.
//!
//! Every buffer keeps a CPU mirror; updates only touch the mirror and mark
//! it dirty, and the next upload copies the whole mirror to the GPU once.

use crate::reflect::ConstantBufferLayout;
use photon_gpu::{GpuBuffer, GpuError, Result};

/// Destination of a constant buffer upload.
pub trait HostWrite {
    /// Copy `data` to `offset` bytes into the destination.
    fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()>;
}

impl HostWrite for GpuBuffer {
    fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        GpuBuffer::write_bytes(self, offset, data)
    }
}

/// A constant buffer, its CPU mirror and its descriptor slot.
pub struct ConstantBuffer<T = GpuBuffer> {
    layout: ConstantBufferLayout,
    mirror: Vec<u8>,
    target: T,
    slot: u32,
    dirty: bool,
}

impl<T: HostWrite> ConstantBuffer<T> {
    /// Wrap `target`, whose contents start out equal to a zeroed mirror.
    pub fn new(layout: ConstantBufferLayout, target: T, slot: u32) -> Self {
        let mirror = vec![0; layout.size as usize];
        Self {
            layout,
            mirror,
            target,
            slot,
            dirty: false,
        }
    }

    /// Overwrite the bytes of `variable` starting at its offset.
    ///
    /// `data` may be shorter than the variable.
    pub fn update(&mut self, variable: &str, data: &[u8]) -> Result<()> {
        let entry = self.layout.variables.get(variable).ok_or_else(|| {
            GpuError::NotFound(format!(
                "Variable {variable} in constant buffer {}",
                self.layout.name
            ))
        })?;
        if data.len() > entry.size as usize {
            return Err(GpuError::InvalidData(format!(
                "{} bytes written to {variable}, which holds {}",
                data.len(),
                entry.size
            )));
        }

        let start = entry.offset as usize;
        self.mirror[start..start + data.len()].copy_from_slice(data);
        self.dirty = true;
        Ok(())
    }

    /// Copy the mirror to the GPU if anything changed; returns whether it did.
    pub fn upload(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.target.write_bytes(0, &self.mirror)?;
        self.dirty = false;
        Ok(true)
    }

    /// Reflected block name.
    pub fn name(&self) -> &str {
        &self.layout.name
    }

    pub fn layout(&self) -> &ConstantBufferLayout {
        &self.layout
    }

    /// Descriptor slot of the uniform view.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Current CPU-side contents.
    pub fn mirror(&self) -> &[u8] {
        &self.mirror
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::ConstantVariable;
    use hashbrown::HashMap;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct HostMemory {
        bytes: RefCell<Vec<u8>>,
        writes: Cell<u32>,
    }

    impl HostWrite for HostMemory {
        fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
            let mut bytes = self.bytes.borrow_mut();
            let end = offset as usize + data.len();
            if bytes.len() < end {
                bytes.resize(end, 0);
            }
            bytes[offset as usize..end].copy_from_slice(data);
            self.writes.set(self.writes.get() + 1);
            Ok(())
        }
    }

    fn layout() -> ConstantBufferLayout {
        let mut variables = HashMap::new();
        variables.insert(
            "inverseView".to_string(),
            ConstantVariable { offset: 0, size: 64 },
        );
        variables.insert(
            "nLights".to_string(),
            ConstantVariable {
                offset: 128,
                size: 4,
            },
        );
        variables.insert(
            "SPP".to_string(),
            ConstantVariable {
                offset: 136,
                size: 4,
            },
        );
        ConstantBufferLayout {
            name: "CBuffer".to_string(),
            variables,
            size: 140,
        }
    }

    #[test]
    fn update_then_upload_matches_mirror() {
        let mut buffer = ConstantBuffer::new(layout(), HostMemory::default(), 3);
        buffer.update("nLights", &7u32.to_le_bytes()).unwrap();
        buffer.update("SPP", &2.0f32.to_le_bytes()).unwrap();
        assert!(buffer.is_dirty());

        assert!(buffer.upload().unwrap());
        assert!(!buffer.is_dirty());
        assert_eq!(*buffer.target.bytes.borrow(), buffer.mirror());
        assert_eq!(&buffer.mirror()[128..132], &7u32.to_le_bytes());
        assert_eq!(buffer.slot(), 3);
    }

    #[test]
    fn clean_upload_copies_nothing() {
        let mut buffer = ConstantBuffer::new(layout(), HostMemory::default(), 0);
        assert!(!buffer.upload().unwrap());
        assert_eq!(buffer.target.writes.get(), 0);

        buffer.update("SPP", &1.0f32.to_le_bytes()).unwrap();
        assert!(buffer.upload().unwrap());
        assert!(!buffer.upload().unwrap());
        assert_eq!(buffer.target.writes.get(), 1);
    }

    #[test]
    fn partial_update_keeps_trailing_bytes() {
        let mut buffer = ConstantBuffer::new(layout(), HostMemory::default(), 0);
        buffer.update("inverseView", &[1u8; 64]).unwrap();
        buffer.update("inverseView", &[2u8; 16]).unwrap();
        assert_eq!(&buffer.mirror()[..16], &[2u8; 16]);
        assert_eq!(&buffer.mirror()[16..64], &[1u8; 48]);
    }

    #[test]
    fn bad_updates_rejected() {
        let mut buffer = ConstantBuffer::new(layout(), HostMemory::default(), 0);
        assert!(matches!(
            buffer.update("missing", &[0]),
            Err(GpuError::NotFound(_))
        ));
        assert!(matches!(
            buffer.update("nLights", &[0; 8]),
            Err(GpuError::InvalidData(_))
        ));
        assert!(!buffer.is_dirty());
    }
}
