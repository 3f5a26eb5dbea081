//! Controllable resources and the catalog that resolves attachments to them.
//!
//! Every resource kind exposes the same fixed set of lifecycle operations
//! through [`Resource::perform`]; a kind that cannot honour an action answers
//! [`ActionOutcome::Unsupported`] instead of failing.

use crate::error::ResourceError;
use crate::inventory::{Inventory, PowerState, VirtualMachine};
use crate::tree::{NodeId, ResourceRef, ServiceTree};
use crate::types::LifecycleAction;
use chrono::Utc;

// ---------------------------------------------------------------------------
// ActionOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Performed,
    /// The resource does not implement this action. Not an error.
    Unsupported,
    /// The resource is a nested service; its own run must be requested.
    Delegated(NodeId),
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

pub trait Resource {
    fn reference(&self) -> ResourceRef;

    fn name(&self) -> Option<&str> {
        None
    }

    fn zone(&self) -> Option<&str> {
        None
    }

    /// Re-checked before every stage. An ineligible resource fails the whole
    /// stage rather than being skipped.
    fn validate(&self) -> Result<(), ResourceError> {
        Ok(())
    }

    fn perform(&mut self, action: LifecycleAction) -> Result<ActionOutcome, ResourceError>;

    /// `Vm:3:web-01`, or `Vm:3` when the resource has no name.
    fn display_name(&self) -> String {
        let r = self.reference();
        match self.name() {
            Some(name) => format!("{}:{}:{}", r.kind().label(), r.id(), name),
            None => format!("{}:{}", r.kind().label(), r.id()),
        }
    }
}

/// Resolves attachment references to live resources.
pub trait ResourceCatalog {
    /// `None` when the referenced resource no longer exists.
    fn resolve(&mut self, resource: &ResourceRef) -> Option<Box<dyn Resource + '_>>;
}

// ---------------------------------------------------------------------------
// VmResource
// ---------------------------------------------------------------------------

pub struct VmResource<'a> {
    vm: &'a mut VirtualMachine,
}

impl<'a> VmResource<'a> {
    pub fn new(vm: &'a mut VirtualMachine) -> Self {
        Self { vm }
    }

    fn set_state(&mut self, state: PowerState) {
        self.vm.power_state = state;
        self.vm.updated_at = Utc::now();
    }
}

impl Resource for VmResource<'_> {
    fn reference(&self) -> ResourceRef {
        ResourceRef::Vm { id: self.vm.id }
    }

    fn name(&self) -> Option<&str> {
        Some(&self.vm.name)
    }

    fn zone(&self) -> Option<&str> {
        self.vm.zone.as_deref()
    }

    fn validate(&self) -> Result<(), ResourceError> {
        if self.vm.template {
            return Err(ResourceError::Ineligible(format!(
                "vm {} has been converted to a template",
                self.vm.name
            )));
        }
        Ok(())
    }

    fn perform(&mut self, action: LifecycleAction) -> Result<ActionOutcome, ResourceError> {
        self.validate()?;
        let current = self.vm.power_state;
        match (action, current) {
            (LifecycleAction::Start, _) => self.set_state(PowerState::On),
            (LifecycleAction::Stop, _) => self.set_state(PowerState::Off),
            (LifecycleAction::Suspend, PowerState::On) => self.set_state(PowerState::Suspended),
            (LifecycleAction::Suspend, PowerState::Suspended) => {}
            (LifecycleAction::Suspend, PowerState::Off) => {
                return Err(ResourceError::Rejected(format!(
                    "cannot suspend vm {} while it is off",
                    self.vm.name
                )));
            }
            (LifecycleAction::ShutdownGuest, _) if !self.vm.guest_tools => {
                return Ok(ActionOutcome::Unsupported);
            }
            (LifecycleAction::ShutdownGuest, PowerState::On) => self.set_state(PowerState::Off),
            (LifecycleAction::ShutdownGuest, PowerState::Off) => {}
            (LifecycleAction::ShutdownGuest, PowerState::Suspended) => {
                return Err(ResourceError::Rejected(format!(
                    "guest of vm {} is suspended",
                    self.vm.name
                )));
            }
        }
        Ok(ActionOutcome::Performed)
    }
}

// ---------------------------------------------------------------------------
// NestedService
// ---------------------------------------------------------------------------

/// A service node attached to another node as a resource. Acting on it
/// starts an independent run rooted at that service.
pub struct NestedService<'a> {
    id: NodeId,
    name: &'a str,
}

impl<'a> NestedService<'a> {
    pub fn new(id: NodeId, name: &'a str) -> Self {
        Self { id, name }
    }
}

impl Resource for NestedService<'_> {
    fn reference(&self) -> ResourceRef {
        ResourceRef::Service { id: self.id }
    }

    fn name(&self) -> Option<&str> {
        Some(self.name)
    }

    fn perform(&mut self, _action: LifecycleAction) -> Result<ActionOutcome, ResourceError> {
        Ok(ActionOutcome::Delegated(self.id))
    }
}

// ---------------------------------------------------------------------------
// LocalCatalog
// ---------------------------------------------------------------------------

/// Catalog over the on-disk inventory and service tree.
pub struct LocalCatalog<'a> {
    inventory: &'a mut Inventory,
    tree: &'a ServiceTree,
}

impl<'a> LocalCatalog<'a> {
    pub fn new(inventory: &'a mut Inventory, tree: &'a ServiceTree) -> Self {
        Self { inventory, tree }
    }
}

impl ResourceCatalog for LocalCatalog<'_> {
    fn resolve(&mut self, resource: &ResourceRef) -> Option<Box<dyn Resource + '_>> {
        match *resource {
            ResourceRef::Vm { id } => self
                .inventory
                .vms
                .get_mut(&id)
                .map(|vm| Box::new(VmResource::new(vm)) as Box<dyn Resource + '_>),
            ResourceRef::Service { id } => self
                .tree
                .nodes
                .get(&id)
                .map(|n| Box::new(NestedService::new(n.id, &n.name)) as Box<dyn Resource + '_>),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(state: PowerState) -> VirtualMachine {
        let mut inv = Inventory::new();
        let id = inv.add_vm("web-01", Some("east".into()), true);
        let mut vm = inv.get(id).unwrap().clone();
        vm.power_state = state;
        vm
    }

    #[test]
    fn start_and_stop_change_power_state() {
        let mut v = vm(PowerState::Off);
        let mut r = VmResource::new(&mut v);
        assert_eq!(r.perform(LifecycleAction::Start), Ok(ActionOutcome::Performed));
        assert_eq!(r.perform(LifecycleAction::Suspend), Ok(ActionOutcome::Performed));
        assert_eq!(r.perform(LifecycleAction::Stop), Ok(ActionOutcome::Performed));
        assert_eq!(v.power_state, PowerState::Off);
    }

    #[test]
    fn suspend_of_powered_off_vm_is_rejected() {
        let mut v = vm(PowerState::Off);
        let mut r = VmResource::new(&mut v);
        assert!(matches!(
            r.perform(LifecycleAction::Suspend),
            Err(ResourceError::Rejected(_))
        ));
    }

    #[test]
    fn shutdown_guest_without_tools_is_unsupported() {
        let mut v = vm(PowerState::On);
        v.guest_tools = false;
        let mut r = VmResource::new(&mut v);
        assert_eq!(
            r.perform(LifecycleAction::ShutdownGuest),
            Ok(ActionOutcome::Unsupported)
        );
        assert_eq!(v.power_state, PowerState::On);
    }

    #[test]
    fn template_is_ineligible() {
        let mut v = vm(PowerState::Off);
        v.template = true;
        let mut r = VmResource::new(&mut v);
        assert!(matches!(r.validate(), Err(ResourceError::Ineligible(_))));
        assert!(r.perform(LifecycleAction::Start).is_err());
    }

    #[test]
    fn display_name_includes_kind_id_and_name() {
        let mut v = vm(PowerState::Off);
        let r = VmResource::new(&mut v);
        assert_eq!(r.display_name(), "Vm:1:web-01");
        assert_eq!(r.zone(), Some("east"));
    }

    #[test]
    fn catalog_resolves_vms_and_nested_services() {
        let mut tree = ServiceTree::new();
        let child = tree.add_service("child", None).unwrap();
        let mut inv = Inventory::new();
        let vm_id = inv.add_vm("web-01", None, true);

        let mut catalog = LocalCatalog::new(&mut inv, &tree);
        assert!(catalog.resolve(&ResourceRef::Vm { id: vm_id }).is_some());
        assert!(catalog.resolve(&ResourceRef::Vm { id: 99 }).is_none());

        let mut nested = catalog.resolve(&ResourceRef::Service { id: child }).unwrap();
        assert_eq!(
            nested.perform(LifecycleAction::Stop),
            Ok(ActionOutcome::Delegated(child))
        );
    }
}
