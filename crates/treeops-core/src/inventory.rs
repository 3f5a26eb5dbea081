//! Local registry of virtual machines and their simulated power state.

use crate::error::{Result, TreeopsError};
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

pub type VmId = u64;

// ---------------------------------------------------------------------------
// PowerState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
    Suspended,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerState::On => "on",
            PowerState::Off => "off",
            PowerState::Suspended => "suspended",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// VirtualMachine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub id: VmId,
    pub name: String,
    pub power_state: PowerState,
    /// A VM converted to a template can no longer be powered.
    #[serde(default)]
    pub template: bool,
    /// Execution venue, used as the queue affinity hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default = "default_guest_tools")]
    pub guest_tools: bool,
    pub updated_at: DateTime<Utc>,
}

fn default_guest_tools() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default = "default_next_id")]
    pub next_id: VmId,
    #[serde(default)]
    pub vms: BTreeMap<VmId, VirtualMachine>,
}

fn default_next_id() -> VmId {
    1
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            vms: BTreeMap::new(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::inventory_path(root);
        if !path.exists() {
            return Err(TreeopsError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let inventory: Inventory = serde_yaml::from_str(&data)?;
        Ok(inventory)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::inventory_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn add_vm(
        &mut self,
        name: impl Into<String>,
        zone: Option<String>,
        guest_tools: bool,
    ) -> VmId {
        let id = self.next_id;
        self.next_id += 1;
        self.vms.insert(
            id,
            VirtualMachine {
                id,
                name: name.into(),
                power_state: PowerState::Off,
                template: false,
                zone,
                guest_tools,
                updated_at: Utc::now(),
            },
        );
        id
    }

    pub fn get(&self, id: VmId) -> Result<&VirtualMachine> {
        self.vms.get(&id).ok_or(TreeopsError::VmNotFound(id))
    }

    pub fn get_mut(&mut self, id: VmId) -> Result<&mut VirtualMachine> {
        self.vms.get_mut(&id).ok_or(TreeopsError::VmNotFound(id))
    }

    pub fn mark_template(&mut self, id: VmId) -> Result<()> {
        let vm = self.get_mut(id)?;
        vm.template = true;
        vm.power_state = PowerState::Off;
        vm.updated_at = Utc::now();
        Ok(())
    }

    /// Copy power states that `from` changed at or after `since` onto this
    /// inventory, leaving every other field as it is here. VMs removed or
    /// turned into templates in the meantime keep their current state.
    ///
    /// Returns the number of VMs updated.
    pub fn merge_power_changes(&mut self, from: &Inventory, since: DateTime<Utc>) -> usize {
        let mut merged = 0;
        for changed in from.vms.values().filter(|vm| vm.updated_at >= since) {
            let Some(vm) = self.vms.get_mut(&changed.id) else {
                continue;
            };
            if vm.template || vm.updated_at > changed.updated_at {
                continue;
            }
            vm.power_state = changed.power_state;
            vm.updated_at = changed.updated_at;
            merged += 1;
        }
        merged
    }
}
