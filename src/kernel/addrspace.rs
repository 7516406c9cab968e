//! Address spaces
//!
//! The kernel only needs four things from the VM system: copy an address
//! space for fork, make one current, move bytes in and out of it, and
//! throw it away. `MemoryAddressSpace` is a plain region map with eager
//! copies.

use super::error::{KResult, KernelError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub trait AddressSpace: Send {
    /// A deep copy for a forked child
    fn copy(&self) -> KResult<Box<dyn AddressSpace>>;

    /// Make this the address space of the running thread
    fn activate(&self);

    /// Copy bytes out of user memory
    fn read(&self, vaddr: u64, buf: &mut [u8]) -> KResult<()>;

    /// Copy bytes into user memory
    fn write(&mut self, vaddr: u64, data: &[u8]) -> KResult<()>;

    fn destroy(self: Box<Self>);
}

/// Regions keyed by base address
#[derive(Debug, Default)]
pub struct MemoryAddressSpace {
    regions: BTreeMap<u64, Vec<u8>>,
    activations: AtomicUsize,
}

impl MemoryAddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `size` zeroed bytes at `base`. Regions may not overlap.
    pub fn define_region(&mut self, base: u64, size: usize) -> KResult<()> {
        let end = base
            .checked_add(size as u64)
            .ok_or(KernelError::InvalidArgument)?;
        if size == 0 || self.overlaps(base, end) {
            return Err(KernelError::InvalidArgument);
        }
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(size)?;
        bytes.resize(size, 0);
        self.regions.insert(base, bytes);
        Ok(())
    }

    fn overlaps(&self, base: u64, end: u64) -> bool {
        self.regions
            .range(..end)
            .next_back()
            .is_some_and(|(start, bytes)| start + bytes.len() as u64 > base)
    }

    /// The region holding `[vaddr, vaddr + len)` and the offset into it
    fn locate(&self, vaddr: u64, len: usize) -> KResult<(u64, usize)> {
        let (base, bytes) = self
            .regions
            .range(..=vaddr)
            .next_back()
            .ok_or(KernelError::InvalidArgument)?;
        let offset = (vaddr - base) as usize;
        if offset.checked_add(len).is_none_or(|end| end > bytes.len()) {
            return Err(KernelError::InvalidArgument);
        }
        Ok((*base, offset))
    }

    pub fn regions(&self) -> usize {
        self.regions.len()
    }

    /// Times this address space has been made current
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::Relaxed)
    }
}

impl AddressSpace for MemoryAddressSpace {
    fn copy(&self) -> KResult<Box<dyn AddressSpace>> {
        let mut regions = BTreeMap::new();
        for (base, bytes) in &self.regions {
            let mut copy = Vec::new();
            copy.try_reserve_exact(bytes.len())?;
            copy.extend_from_slice(bytes);
            regions.insert(*base, copy);
        }
        Ok(Box::new(MemoryAddressSpace {
            regions,
            activations: AtomicUsize::new(0),
        }))
    }

    fn activate(&self) {
        self.activations.fetch_add(1, Ordering::Relaxed);
    }

    fn read(&self, vaddr: u64, buf: &mut [u8]) -> KResult<()> {
        let (base, offset) = self.locate(vaddr, buf.len())?;
        let bytes = &self.regions[&base];
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, vaddr: u64, data: &[u8]) -> KResult<()> {
        let (base, offset) = self.locate(vaddr, data.len())?;
        if let Some(bytes) = self.regions.get_mut(&base) {
            bytes[offset..offset + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn destroy(self: Box<Self>) {
        log::trace!("address space destroyed ({} regions)", self.regions.len());
    }
}
