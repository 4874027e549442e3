// Lifetime ledger - which GPU objects are alive and what they depend on
//
// Every owner registers its handles on creation and unregisters them when it
// drops. The ledger rejects creating an object whose dependencies are gone,
// creating a second copy of a singular object, and destroying an object that
// something live still references.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Instance,
    DebugMessenger,
    Surface,
    Device,
    Swapchain,
    ImageView(usize),
    RenderPass,
    PipelineLayout,
    Pipeline,
    Framebuffer(usize),
    CommandPool,
    RecordedCommands(usize),
    ImageAvailableSemaphore,
    RenderFinishedSemaphore,
    InFlightFence,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageView(i) => write!(f, "image view #{}", i),
            Self::Framebuffer(i) => write!(f, "framebuffer #{}", i),
            Self::RecordedCommands(i) => write!(f, "command buffer #{}", i),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifetimeError {
    #[error("{kind} is already alive")]
    AlreadyLive { kind: ResourceKind },

    #[error("{kind} depends on {dependency}, which is not alive")]
    MissingDependency {
        kind: ResourceKind,
        dependency: ResourceKind,
    },

    #[error("{kind} was destroyed but never created")]
    NotLive { kind: ResourceKind },

    #[error("{kind} destroyed while still referenced by {dependents:?}")]
    StillReferenced {
        kind: ResourceKind,
        dependents: Vec<ResourceKind>,
    },
}

#[derive(Debug)]
struct Entry {
    kind: ResourceKind,
    depends_on: Vec<ResourceKind>,
}

/// Live objects in creation order
#[derive(Debug, Default)]
pub struct LifetimeLedger {
    live: Vec<Entry>,
}

impl LifetimeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(
        &mut self,
        kind: ResourceKind,
        depends_on: &[ResourceKind],
    ) -> Result<(), LifetimeError> {
        if self.is_live(kind) {
            return Err(LifetimeError::AlreadyLive { kind });
        }
        if let Some(&dependency) = depends_on.iter().find(|&&d| !self.is_live(d)) {
            return Err(LifetimeError::MissingDependency { kind, dependency });
        }

        self.live.push(Entry {
            kind,
            depends_on: depends_on.to_vec(),
        });
        Ok(())
    }

    /// The entry is removed even when dependents remain, so one bad drop
    /// produces one report instead of a cascade.
    pub fn destroyed(&mut self, kind: ResourceKind) -> Result<(), LifetimeError> {
        let position = self
            .live
            .iter()
            .position(|e| e.kind == kind)
            .ok_or(LifetimeError::NotLive { kind })?;

        let dependents = self.dependents_of(kind);
        self.live.remove(position);

        if dependents.is_empty() {
            Ok(())
        } else {
            Err(LifetimeError::StillReferenced { kind, dependents })
        }
    }

    pub fn is_live(&self, kind: ResourceKind) -> bool {
        self.live.iter().any(|e| e.kind == kind)
    }

    pub fn dependents_of(&self, kind: ResourceKind) -> Vec<ResourceKind> {
        self.live
            .iter()
            .filter(|e| e.depends_on.contains(&kind))
            .map(|e| e.kind)
            .collect()
    }

    /// Reverse of creation order
    pub fn teardown_order(&self) -> Vec<ResourceKind> {
        self.live.iter().rev().map(|e| e.kind).collect()
    }

    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceKind::*;
    use super::*;

    /// The sequence the renderer follows for a swapchain of `images` images
    fn build_renderer_graph(ledger: &mut LifetimeLedger, images: usize) -> Vec<ResourceKind> {
        let mut order = Vec::new();
        let mut create = |ledger: &mut LifetimeLedger, kind: ResourceKind, deps: &[ResourceKind]| {
            ledger.created(kind, deps).unwrap();
            order.push(kind);
        };

        create(ledger, Instance, &[]);
        create(ledger, DebugMessenger, &[Instance]);
        create(ledger, Surface, &[Instance]);
        create(ledger, Device, &[Instance]);
        create(ledger, Swapchain, &[Device, Surface]);
        for i in 0..images {
            create(ledger, ImageView(i), &[Device, Swapchain]);
        }
        create(ledger, RenderPass, &[Device]);
        create(ledger, PipelineLayout, &[Device]);
        create(ledger, Pipeline, &[Device, RenderPass, PipelineLayout]);
        for i in 0..images {
            create(ledger, Framebuffer(i), &[Device, RenderPass, ImageView(i)]);
        }
        create(ledger, CommandPool, &[Device]);
        for i in 0..images {
            create(ledger, RecordedCommands(i), &[CommandPool, Pipeline, Framebuffer(i)]);
        }
        create(ledger, ImageAvailableSemaphore, &[Device]);
        create(ledger, RenderFinishedSemaphore, &[Device]);
        create(ledger, InFlightFence, &[Device]);
        order
    }

    #[test]
    fn teardown_is_exact_reverse_of_creation() {
        let mut ledger = LifetimeLedger::new();
        let mut creation = build_renderer_graph(&mut ledger, 3);

        let teardown = ledger.teardown_order();
        creation.reverse();
        assert_eq!(teardown, creation);

        for kind in teardown {
            assert_eq!(ledger.destroyed(kind), Ok(()), "destroying {}", kind);
        }
        assert_eq!(ledger.live_count(), 0);
    }

    #[test]
    fn destroying_a_referenced_resource_is_reported() {
        let mut ledger = LifetimeLedger::new();
        build_renderer_graph(&mut ledger, 2);

        let err = ledger.destroyed(RenderPass).unwrap_err();
        assert_eq!(
            err,
            LifetimeError::StillReferenced {
                kind: RenderPass,
                dependents: vec![Pipeline, Framebuffer(0), Framebuffer(1)],
            }
        );
        assert!(!ledger.is_live(RenderPass));
    }

    #[test]
    fn device_before_swapchain_is_reported() {
        let mut ledger = LifetimeLedger::new();
        ledger.created(Instance, &[]).unwrap();
        ledger.created(Surface, &[Instance]).unwrap();
        ledger.created(Device, &[Instance]).unwrap();
        ledger.created(Swapchain, &[Device, Surface]).unwrap();

        assert!(matches!(
            ledger.destroyed(Device),
            Err(LifetimeError::StillReferenced { kind: Device, .. })
        ));
    }

    #[test]
    fn second_logical_device_is_rejected_until_first_is_released() {
        let mut ledger = LifetimeLedger::new();
        ledger.created(Instance, &[]).unwrap();
        ledger.created(Device, &[Instance]).unwrap();

        assert_eq!(
            ledger.created(Device, &[Instance]),
            Err(LifetimeError::AlreadyLive { kind: Device })
        );

        ledger.destroyed(Device).unwrap();
        assert_eq!(ledger.created(Device, &[Instance]), Ok(()));
    }

    #[test]
    fn framebuffer_requires_its_own_view() {
        let mut ledger = LifetimeLedger::new();
        ledger.created(Instance, &[]).unwrap();
        ledger.created(Device, &[Instance]).unwrap();
        ledger.created(RenderPass, &[Device]).unwrap();

        assert_eq!(
            ledger.created(Framebuffer(2), &[Device, RenderPass, ImageView(2)]),
            Err(LifetimeError::MissingDependency {
                kind: Framebuffer(2),
                dependency: ImageView(2),
            })
        );
    }

    #[test]
    fn unknown_destroy_is_reported() {
        let mut ledger = LifetimeLedger::new();
        assert_eq!(
            ledger.destroyed(CommandPool),
            Err(LifetimeError::NotLive { kind: CommandPool })
        );
    }
}
