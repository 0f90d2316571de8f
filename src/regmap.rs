//! Deferred register map (C2).
//!
//! Solvers compute derived register values in a non-linear order; writing
//! each immediately would be wrong because some register pairs must
//! transition atomically. This scratchpad stages writes by address and
//! flushes them as one ordered sequence, so the final wire sequence is
//! reproducible and easy to dump for debugging.

use std::collections::BTreeMap;

use log::debug;

use crate::bus::RegisterBus;
use crate::error::Result;

/// Address-indexed staging buffer. Owned by the chip state it belongs to
/// and reset at the start of each programming episode — never reused
/// across solver calls.
#[derive(Default)]
pub struct DeferredRegisterMap {
    pending: BTreeMap<u16, u8>,
}

impl DeferredRegisterMap {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
        }
    }

    /// Stage a write. A later write to an address already staged replaces
    /// the pending value; disagreement is logged but the new value always
    /// wins.
    pub fn stage(&mut self, addr: u16, value: u8) {
        if let Some(&old) = self.pending.get(&addr) {
            if old != value {
                debug!(
                    "register 0x{:04x}: staged value 0x{:02x} overwritten by 0x{:02x}",
                    addr, old, value
                );
            }
        }
        self.pending.insert(addr, value);
    }

    pub fn stage_all(&mut self, regs: impl IntoIterator<Item = (u16, u8)>) {
        for (addr, value) in regs {
            self.stage(addr, value);
        }
    }

    /// Issue every staged entry through the bus in ascending address
    /// order, then clear the buffer.
    pub fn flush(&mut self, bus: &mut dyn RegisterBus) -> Result<()> {
        for (&addr, &value) in self.pending.iter() {
            bus.write_reg(addr, value)?;
        }
        self.pending.clear();
        Ok(())
    }

    /// Invalidate every staged entry without writing it.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Iterate staged entries in the order `flush` would emit them, for
    /// tests and diagnostic dumps.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u8)> + '_ {
        self.pending.iter().map(|(&a, &v)| (a, v))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;

    struct RecordingBus {
        writes: Vec<(u16, u8)>,
    }

    impl RegisterBus for RecordingBus {
        fn write_reg(&mut self, addr: u16, value: u8) -> Result<()> {
            self.writes.push((addr, value));
            Ok(())
        }
        fn read_reg(&mut self, _addr: u16) -> Result<u8> {
            Err(ErrorKind::Unsupported("read not modeled".into()).into())
        }
    }

    #[test]
    fn later_write_to_same_address_wins() {
        let mut map = DeferredRegisterMap::new();
        map.stage(0x10, 0x01);
        map.stage(0x10, 0x02);
        assert_eq!(map.iter().collect::<Vec<_>>(), vec![(0x10, 0x02)]);
    }

    #[test]
    fn flush_emits_in_ascending_address_order() {
        let mut map = DeferredRegisterMap::new();
        map.stage(0x30, 0xaa);
        map.stage(0x10, 0xbb);
        map.stage(0x20, 0xcc);
        let mut bus = RecordingBus { writes: Vec::new() };
        map.flush(&mut bus).unwrap();
        assert_eq!(bus.writes, vec![(0x10, 0xbb), (0x20, 0xcc), (0x30, 0xaa)]);
        assert!(map.is_empty());
    }

    #[test]
    fn reset_discards_without_writing() {
        let mut map = DeferredRegisterMap::new();
        map.stage(0x10, 0x01);
        map.reset();
        assert!(map.is_empty());
    }
}
