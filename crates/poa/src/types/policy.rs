//! Adapter policies
//!
//! The seven standard policies plus two vendor extensions. A [`PolicyTable`]
//! is resolved and validated once, when an adapter is created, and never
//! changes afterwards.

use super::error::{PoaError, Result};

/// Threading model for dispatch into an adapter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ThreadPolicy {
    /// Requests may be dispatched concurrently
    #[default]
    OrbControlled,
    /// Requests are dispatched one at a time (re-entry by the same thread allowed)
    SingleThread,
}

/// Lifetime of references created by an adapter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LifespanPolicy {
    /// References die with this incarnation of the adapter
    #[default]
    Transient,
    /// References outlive the adapter and the server process
    Persistent,
}

/// Whether a servant may be bound to more than one id
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IdUniquenessPolicy {
    #[default]
    Unique,
    Multiple,
}

/// Who chooses object ids
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IdAssignmentPolicy {
    #[default]
    System,
    User,
}

/// Whether id-to-servant bindings are kept in an active object map
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ServantRetentionPolicy {
    #[default]
    Retain,
    NonRetain,
}

/// How a servant is found for a request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RequestProcessingPolicy {
    #[default]
    ActiveObjectMapOnly,
    DefaultServant,
    ServantManager,
}

/// Whether unregistered servants are activated on demand
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ImplicitActivationPolicy {
    #[default]
    NoImplicit,
    Implicit,
}

/// Vendor extension: how aggressively the dispatch layer may cache servants
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ServantCachingPolicy {
    #[default]
    NoCaching,
    /// Colocated callers may keep the servant between calls
    ReferenceCaching,
}

/// Vendor extension: argument passing for colocated calls
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CopySemanticsPolicy {
    #[default]
    CopyArguments,
    ShareArguments,
}

/// Policy type tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    Thread,
    Lifespan,
    IdUniqueness,
    IdAssignment,
    ServantRetention,
    RequestProcessing,
    ImplicitActivation,
    ServantCaching,
    CopySemantics,
}

impl PolicyKind {
    const COUNT: usize = 9;

    fn index(self) -> usize {
        self as usize
    }
}

/// One policy value, as passed to `create_poa`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    Thread(ThreadPolicy),
    Lifespan(LifespanPolicy),
    IdUniqueness(IdUniquenessPolicy),
    IdAssignment(IdAssignmentPolicy),
    ServantRetention(ServantRetentionPolicy),
    RequestProcessing(RequestProcessingPolicy),
    ImplicitActivation(ImplicitActivationPolicy),
    ServantCaching(ServantCachingPolicy),
    CopySemantics(CopySemanticsPolicy),
}

impl Policy {
    pub fn kind(&self) -> PolicyKind {
        match self {
            Policy::Thread(_) => PolicyKind::Thread,
            Policy::Lifespan(_) => PolicyKind::Lifespan,
            Policy::IdUniqueness(_) => PolicyKind::IdUniqueness,
            Policy::IdAssignment(_) => PolicyKind::IdAssignment,
            Policy::ServantRetention(_) => PolicyKind::ServantRetention,
            Policy::RequestProcessing(_) => PolicyKind::RequestProcessing,
            Policy::ImplicitActivation(_) => PolicyKind::ImplicitActivation,
            Policy::ServantCaching(_) => PolicyKind::ServantCaching,
            Policy::CopySemantics(_) => PolicyKind::CopySemantics,
        }
    }
}

/// Resolved, validated policy set of one adapter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PolicyTable {
    thread: ThreadPolicy,
    lifespan: LifespanPolicy,
    id_uniqueness: IdUniquenessPolicy,
    id_assignment: IdAssignmentPolicy,
    servant_retention: ServantRetentionPolicy,
    request_processing: RequestProcessingPolicy,
    implicit_activation: ImplicitActivationPolicy,
    servant_caching: ServantCachingPolicy,
    copy_semantics: CopySemanticsPolicy,
}

impl PolicyTable {
    /// Resolve a policy list on top of the defaults and validate it
    ///
    /// On an illegal combination the error carries the index of the first
    /// listed policy taking part in a violated rule.
    pub fn new(policies: &[Policy]) -> Result<Self> {
        let mut table = PolicyTable::default();
        let mut seen: [Option<usize>; PolicyKind::COUNT] = [None; PolicyKind::COUNT];

        for (index, policy) in policies.iter().enumerate() {
            let slot = &mut seen[policy.kind().index()];
            if slot.is_some() {
                return Err(PoaError::InvalidPolicy {
                    index,
                    reason: format!("duplicate {:?} policy", policy.kind()),
                });
            }
            *slot = Some(index);
            table.apply(*policy);
        }

        let at = |kind: PolicyKind| seen[kind.index()];
        let mut first: Option<(usize, &'static str)> = None;
        let mut report = |indices: &[Option<usize>], reason: &'static str| {
            if let Some(index) = indices.iter().flatten().min().copied() {
                if first.map_or(true, |(current, _)| index < current) {
                    first = Some((index, reason));
                }
            }
        };

        if table.implicit_activation == ImplicitActivationPolicy::Implicit {
            if table.servant_retention == ServantRetentionPolicy::NonRetain {
                report(
                    &[at(PolicyKind::ImplicitActivation), at(PolicyKind::ServantRetention)],
                    "IMPLICIT_ACTIVATION requires RETAIN",
                );
            }
            if table.id_assignment == IdAssignmentPolicy::User {
                report(
                    &[at(PolicyKind::ImplicitActivation), at(PolicyKind::IdAssignment)],
                    "IMPLICIT_ACTIVATION requires SYSTEM_ID",
                );
            }
        }
        if table.servant_retention == ServantRetentionPolicy::NonRetain
            && table.request_processing == RequestProcessingPolicy::ActiveObjectMapOnly
        {
            report(
                &[at(PolicyKind::ServantRetention), at(PolicyKind::RequestProcessing)],
                "NON_RETAIN cannot be combined with USE_ACTIVE_OBJECT_MAP_ONLY",
            );
        }

        match first {
            Some((index, reason)) => Err(PoaError::InvalidPolicy {
                index,
                reason: reason.to_string(),
            }),
            None => Ok(table),
        }
    }

    /// Policies of a root adapter
    pub fn root() -> Self {
        PolicyTable {
            implicit_activation: ImplicitActivationPolicy::Implicit,
            ..PolicyTable::default()
        }
    }

    fn apply(&mut self, policy: Policy) {
        match policy {
            Policy::Thread(v) => self.thread = v,
            Policy::Lifespan(v) => self.lifespan = v,
            Policy::IdUniqueness(v) => self.id_uniqueness = v,
            Policy::IdAssignment(v) => self.id_assignment = v,
            Policy::ServantRetention(v) => self.servant_retention = v,
            Policy::RequestProcessing(v) => self.request_processing = v,
            Policy::ImplicitActivation(v) => self.implicit_activation = v,
            Policy::ServantCaching(v) => self.servant_caching = v,
            Policy::CopySemantics(v) => self.copy_semantics = v,
        }
    }

    pub fn thread(&self) -> ThreadPolicy {
        self.thread
    }

    pub fn lifespan(&self) -> LifespanPolicy {
        self.lifespan
    }

    pub fn id_uniqueness(&self) -> IdUniquenessPolicy {
        self.id_uniqueness
    }

    pub fn id_assignment(&self) -> IdAssignmentPolicy {
        self.id_assignment
    }

    pub fn servant_retention(&self) -> ServantRetentionPolicy {
        self.servant_retention
    }

    pub fn request_processing(&self) -> RequestProcessingPolicy {
        self.request_processing
    }

    pub fn implicit_activation(&self) -> ImplicitActivationPolicy {
        self.implicit_activation
    }

    pub fn servant_caching(&self) -> ServantCachingPolicy {
        self.servant_caching
    }

    pub fn copy_semantics(&self) -> CopySemanticsPolicy {
        self.copy_semantics
    }

    pub fn is_retained(&self) -> bool {
        self.servant_retention == ServantRetentionPolicy::Retain
    }

    pub fn is_persistent(&self) -> bool {
        self.lifespan == LifespanPolicy::Persistent
    }

    pub fn is_system_id(&self) -> bool {
        self.id_assignment == IdAssignmentPolicy::System
    }

    pub fn is_unique_id(&self) -> bool {
        self.id_uniqueness == IdUniquenessPolicy::Unique
    }

    pub fn is_implicit(&self) -> bool {
        self.implicit_activation == ImplicitActivationPolicy::Implicit
    }

    /// The policy list that reproduces this table
    pub fn to_policies(&self) -> Vec<Policy> {
        vec![
            Policy::Thread(self.thread),
            Policy::Lifespan(self.lifespan),
            Policy::IdUniqueness(self.id_uniqueness),
            Policy::IdAssignment(self.id_assignment),
            Policy::ServantRetention(self.servant_retention),
            Policy::RequestProcessing(self.request_processing),
            Policy::ImplicitActivation(self.implicit_activation),
            Policy::ServantCaching(self.servant_caching),
            Policy::CopySemantics(self.copy_semantics),
        ]
    }
}
