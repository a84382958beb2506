//! Logical antenna ids and the physical tx/rx port pairs behind them.
//!
//! The module reports the antenna of a read as one byte: transmit port in the
//! high nibble, receive port in the low nibble.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{ProtocolError, Result};
use crate::types::ModuleModel;

/// One mapping of a logical antenna to a physical port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AntennaPortEntry {
    pub logical: u8,
    pub tx: u8,
    pub rx: u8,
}

impl AntennaPortEntry {
    pub fn new(logical: u8, tx: u8, rx: u8) -> Self {
        Self { logical, tx, rx }
    }
}

/// Pack a port pair the way the module encodes it.
pub fn pack(tx: u8, rx: u8) -> u8 {
    ((tx & 0x0F) << 4) | (rx & 0x0F)
}

/// Inverse of [`pack`].
pub fn unpack(packed: u8) -> (u8, u8) {
    (packed >> 4, packed & 0x0F)
}

/// A physical port as reported by port detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortStatus {
    pub port: u8,
    /// An antenna answered the detection pulse.
    pub detected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AntennaMap {
    physical: BTreeSet<u8>,
    forward: BTreeMap<u8, (u8, u8)>,
    reverse: HashMap<u8, u8>,
    transmit: BTreeMap<u8, u8>,
}

impl AntennaMap {
    /// Default map: every physical port is its own logical antenna, used for
    /// both transmit and receive.
    pub fn build(physical_ports: &[u8]) -> Result<Self> {
        let mut map = Self {
            physical: physical_ports.iter().copied().collect(),
            ..Default::default()
        };
        let entries: Vec<_> = map
            .physical
            .iter()
            .map(|&port| AntennaPortEntry::new(port, port, port))
            .collect();
        map.set(&entries)?;
        Ok(map)
    }

    /// Replace the mapping. Validation happens before anything is swapped in,
    /// so a rejected set leaves the current map untouched.
    pub fn set(&mut self, entries: &[AntennaPortEntry]) -> Result<()> {
        let mut forward = BTreeMap::new();
        let mut reverse = HashMap::new();
        let mut transmit = BTreeMap::new();

        for entry in entries {
            for port in [entry.tx, entry.rx] {
                if port > 0x0F {
                    return Err(ProtocolError::InvalidAntennaMap(format!(
                        "port {} does not fit the 4-bit antenna field",
                        port
                    )));
                }
                if !self.physical.contains(&port) {
                    return Err(ProtocolError::InvalidAntennaMap(format!(
                        "port {} is not a detected physical port",
                        port
                    )));
                }
            }
            if forward.insert(entry.logical, (entry.tx, entry.rx)).is_some() {
                return Err(ProtocolError::InvalidAntennaMap(format!(
                    "duplicate logical antenna {}",
                    entry.logical
                )));
            }
            if let Some(previous) = reverse.insert(pack(entry.tx, entry.rx), entry.logical) {
                return Err(ProtocolError::InvalidAntennaMap(format!(
                    "logical antennas {} and {} share tx {} / rx {}",
                    previous, entry.logical, entry.tx, entry.rx
                )));
            }
            transmit.entry(entry.tx).or_insert(entry.logical);
        }

        self.forward = forward;
        self.reverse = reverse;
        self.transmit = transmit;
        Ok(())
    }

    /// Logical antenna for a wire antenna byte. Never guesses.
    pub fn resolve_logical(&self, packed: u8) -> Result<u8> {
        self.reverse.get(&packed).copied().ok_or_else(|| {
            let (tx, rx) = unpack(packed);
            ProtocolError::UnmappedAntenna { tx, rx }
        })
    }

    /// Physical `(tx, rx)` pair of a logical antenna.
    pub fn lookup(&self, logical: u8) -> Result<(u8, u8)> {
        self.forward.get(&logical).copied().ok_or_else(|| {
            ProtocolError::InvalidParameter(format!("logical antenna {} is not mapped", logical))
        })
    }

    /// First logical antenna transmitting on a physical port.
    pub fn transmit_logical(&self, tx: u8) -> Option<u8> {
        self.transmit.get(&tx).copied()
    }

    pub fn physical_ports(&self) -> impl Iterator<Item = u8> + '_ {
        self.physical.iter().copied()
    }

    pub fn logical_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.forward.keys().copied()
    }

    pub fn entries(&self) -> Vec<AntennaPortEntry> {
        self.forward
            .iter()
            .map(|(&logical, &(tx, rx))| AntennaPortEntry::new(logical, tx, rx))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Modules whose tag reports select an antenna bank through GPIO lines.
/// Hardware specific: only these revisions wire a multiplexer to GPIO 1/2.
const GPIO_BANK_MODELS: [ModuleModel; 2] = [ModuleModel::M6e, ModuleModel::M6eI];

/// Apply the GPIO antenna-bank offset (16, 32 or 48) for models that need it.
pub fn gpio_corrected(logical: u8, model: ModuleModel, gpio: Option<u8>) -> u8 {
    match gpio {
        Some(bits) if GPIO_BANK_MODELS.contains(&model) => logical.saturating_add((bits & 0x03) * 16),
        _ => logical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_map() {
        let map = AntennaMap::build(&[1, 2, 4]).unwrap();
        assert_eq!(map.lookup(2).unwrap(), (2, 2));
        assert_eq!(map.resolve_logical(0x44).unwrap(), 4);
        assert_eq!(map.logical_ids().collect::<Vec<_>>(), vec![1, 2, 4]);
    }

    #[test]
    fn test_resolve_roundtrip_for_every_entry() {
        let mut map = AntennaMap::build(&[1, 2, 3, 4]).unwrap();
        let entries = [
            AntennaPortEntry::new(1, 1, 1),
            AntennaPortEntry::new(2, 1, 2),
            AntennaPortEntry::new(5, 3, 4),
            AntennaPortEntry::new(9, 4, 3),
        ];
        map.set(&entries).unwrap();
        for entry in entries {
            assert_eq!(map.resolve_logical(pack(entry.tx, entry.rx)).unwrap(), entry.logical);
        }
        assert_eq!(map.transmit_logical(1), Some(1));
        assert_eq!(map.transmit_logical(4), Some(9));
    }

    #[test]
    fn test_duplicate_logical_rejected_without_mutation() {
        let mut map = AntennaMap::build(&[1, 2]).unwrap();
        let before = map.clone();
        let result = map.set(&[AntennaPortEntry::new(1, 1, 1), AntennaPortEntry::new(1, 2, 2)]);
        assert!(matches!(result, Err(ProtocolError::InvalidAntennaMap(_))));
        assert_eq!(map, before);
    }

    #[test]
    fn test_unknown_port_rejected() {
        let mut map = AntennaMap::build(&[1, 2]).unwrap();
        assert!(map.set(&[AntennaPortEntry::new(1, 1, 3)]).is_err());
        assert_eq!(map.lookup(2).unwrap(), (2, 2));
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let mut map = AntennaMap::build(&[1, 2]).unwrap();
        assert!(map
            .set(&[AntennaPortEntry::new(1, 1, 2), AntennaPortEntry::new(2, 1, 2)])
            .is_err());
    }

    #[test]
    fn test_unmapped_pair_fails_closed() {
        let map = AntennaMap::build(&[1]).unwrap();
        assert_eq!(
            map.resolve_logical(pack(2, 1)),
            Err(ProtocolError::UnmappedAntenna { tx: 2, rx: 1 })
        );
    }

    #[test]
    fn test_gpio_correction() {
        assert_eq!(gpio_corrected(1, ModuleModel::M6e, Some(0b01)), 17);
        assert_eq!(gpio_corrected(1, ModuleModel::M6e, Some(0b11)), 49);
        assert_eq!(gpio_corrected(1, ModuleModel::M6eNano, Some(0b11)), 1);
        assert_eq!(gpio_corrected(3, ModuleModel::M6eI, None), 3);
    }
}
