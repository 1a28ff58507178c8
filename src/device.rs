//! Per-device register storage with independent per-space locking.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::object::ModbusObject;

/// The four register spaces of one Modbus device.
///
/// Each space sits behind its own reader/writer lock, so a slow write to
/// holding registers never blocks a concurrent coil read. The storage is
/// intentionally sparse: boolean spaces keep only the addresses currently
/// true, and register spaces drop entries written as 0, so a zero-valued
/// and an unset register are observationally identical.
#[derive(Debug, Default)]
pub struct ModbusDevice {
    id: u8,
    coils: RwLock<HashSet<u16>>,
    discrete_inputs: RwLock<HashSet<u16>>,
    holding_registers: RwLock<HashMap<u16, u16>>,
    input_registers: RwLock<HashMap<u16, u16>>,
}

impl ModbusDevice {
    pub fn new(id: u8) -> Self {
        ModbusDevice {
            id,
            ..Default::default()
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn get_coil(&self, address: u16) -> ModbusObject {
        let set = self.coils.read();
        ModbusObject::coil(address, set.contains(&address))
    }

    pub fn set_coil(&self, address: u16, value: bool) {
        let mut set = self.coils.write();
        if value {
            set.insert(address);
        } else {
            set.remove(&address);
        }
    }

    pub fn get_discrete_input(&self, address: u16) -> ModbusObject {
        let set = self.discrete_inputs.read();
        ModbusObject::discrete_input(address, set.contains(&address))
    }

    pub fn set_discrete_input(&self, address: u16, value: bool) {
        let mut set = self.discrete_inputs.write();
        if value {
            set.insert(address);
        } else {
            set.remove(&address);
        }
    }

    pub fn get_holding_register(&self, address: u16) -> ModbusObject {
        let map = self.holding_registers.read();
        ModbusObject::holding_register(address, map.get(&address).copied().unwrap_or(0))
    }

    pub fn set_holding_register(&self, address: u16, value: u16) {
        let mut map = self.holding_registers.write();
        if value == 0 {
            map.remove(&address);
        } else {
            map.insert(address, value);
        }
    }

    pub fn get_input_register(&self, address: u16) -> ModbusObject {
        let map = self.input_registers.read();
        ModbusObject::input_register(address, map.get(&address).copied().unwrap_or(0))
    }

    pub fn set_input_register(&self, address: u16, value: u16) {
        let mut map = self.input_registers.write();
        if value == 0 {
            map.remove(&address);
        } else {
            map.insert(address, value);
        }
    }
}
