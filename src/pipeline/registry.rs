//! Arena of pipeline instances and the active slot

use super::instance::PipelineInstance;
use super::types::{CodecKind, InstanceId};

/// At most two instances, indexed by their id, plus the one that is
/// currently fed.
#[derive(Debug, Default)]
pub struct Registry {
    instances: Vec<PipelineInstance>,
    active: Option<InstanceId>,
}

impl Registry {
    pub fn new(instances: Vec<PipelineInstance>) -> Self {
        debug_assert!(instances.len() <= 2, "at most two pipeline instances");
        debug_assert!(
            instances.iter().enumerate().all(|(i, inst)| inst.id().index() == i),
            "instance ids must match their slot"
        );
        Self {
            instances,
            active: None,
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, id: InstanceId) -> Option<&PipelineInstance> {
        self.instances.get(id.index())
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut PipelineInstance> {
        self.instances.get_mut(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipelineInstance> {
        self.instances.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PipelineInstance> {
        self.instances.iter_mut()
    }

    pub fn find_codec(&self, codec: CodecKind) -> Option<InstanceId> {
        self.instances.iter().find(|i| i.codec() == codec).map(|i| i.id())
    }

    pub fn active_id(&self) -> Option<InstanceId> {
        self.active
    }

    pub fn active(&self) -> Option<&PipelineInstance> {
        self.active.and_then(|id| self.get(id))
    }

    pub fn active_mut(&mut self) -> Option<&mut PipelineInstance> {
        match self.active {
            Some(id) => self.instances.get_mut(id.index()),
            None => None,
        }
    }

    /// Change the active slot. Only the active instance keeps its
    /// forwarding tap open.
    pub(crate) fn set_active(&mut self, active: Option<InstanceId>) {
        self.active = active;
        for instance in &self.instances {
            instance.set_tap_live(Some(instance.id()) == active);
        }
    }

    /// Empty the arena, for teardown.
    pub(crate) fn take_all(&mut self) -> Vec<PipelineInstance> {
        self.active = None;
        std::mem::take(&mut self.instances)
    }
}
