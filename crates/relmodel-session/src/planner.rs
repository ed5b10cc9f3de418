//! Cascade planning.
//!
//! The planner walks the live instance graph from a root instance, guided by
//! relation descriptors, and decides which instances are inserted, updated,
//! deleted or have a foreign key rewritten. It then orders those decisions so
//! that:
//!
//! - a row referencing another new row is inserted after it
//! - a row referencing a deleted row is deleted (or unlinked) before it
//! - junction deletes run first and junction inserts run last
//!
//! Each instance is visited at most once per plan. Visits are keyed by
//! [`InstanceIdentity`], so reference cycles in the graph terminate and two
//! arena entries for the same stored row produce one operation.

use crate::identity::{InstanceIdentity, describe};
use crate::instance::{EntityInstance, InstanceGraph, InstanceId, RelationValue};
use crate::plan::{ForeignKeyBinding, PersistencePlan, PlanOp, PlanOpKind};
use relmodel_core::{
    EntityId, Error, OnDelete, PlanningError, PlanningErrorKind, RelationDescriptor,
    RelationDescriptorStore, RelationId, RelationKind, Result, Value,
};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Which call is being planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    Save,
    Remove,
}

/// What happens to a persisted child dropped from a collection whose
/// relation does not cascade removes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrphanAction {
    /// Null the child's foreign key when the column allows it.
    #[default]
    Nullify,
    /// Leave the child row as it is.
    Ignore,
}

/// Configuration for a [`CascadePlanner`].
#[derive(Debug, Clone, Copy)]
pub struct PlannerConfig {
    /// Maximum relation hops from the root.
    pub max_depth: usize,
    pub orphan_action: OrphanAction,
    /// Compare collections against their snapshots to find removed members.
    pub diff_removal: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_depth: 256,
            orphan_action: OrphanAction::Nullify,
            diff_removal: true,
        }
    }
}

impl PlannerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    #[must_use]
    pub fn orphan_action(mut self, action: OrphanAction) -> Self {
        self.orphan_action = action;
        self
    }

    #[must_use]
    pub fn diff_removal(mut self, enabled: bool) -> Self {
        self.diff_removal = enabled;
        self
    }
}

/// Computes [`PersistencePlan`]s against one descriptor store.
#[derive(Debug, Clone, Copy)]
pub struct CascadePlanner<'s> {
    store: &'s RelationDescriptorStore,
    config: PlannerConfig,
}

impl<'s> CascadePlanner<'s> {
    pub fn new(store: &'s RelationDescriptorStore) -> Self {
        Self::with_config(store, PlannerConfig::default())
    }

    pub fn with_config(store: &'s RelationDescriptorStore, config: PlannerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan a save or remove of `root` and everything its relations cascade to.
    ///
    /// Fails without a partial plan.
    #[tracing::instrument(level = "debug", skip(self, graph))]
    pub fn plan(
        &self,
        graph: &InstanceGraph,
        root: InstanceId,
        mode: PlanMode,
    ) -> Result<PersistencePlan> {
        let mut builder = Builder::new(self.store, graph, &self.config);
        match mode {
            PlanMode::Save => {
                builder.visit_save(root, 0)?;
            }
            PlanMode::Remove => {
                if !builder.instance(root)?.is_persisted() {
                    return Err(builder.error(
                        PlanningErrorKind::CompositeKeyArityMismatch,
                        root,
                        None,
                        "cannot remove an instance that has no stored key".to_string(),
                    ));
                }
                builder.visit_remove(root, 0)?;
            }
        }
        let plan = builder.finalize()?;

        tracing::info!(
            ?mode,
            inserts = plan.count(PlanOpKind::Insert),
            updates = plan.count(PlanOpKind::Update),
            deletes = plan.count(PlanOpKind::Delete),
            foreign_key_updates = plan.count(PlanOpKind::UpdateForeignKey),
            junction_inserts = plan.count(PlanOpKind::InsertJunction),
            junction_deletes = plan.count(PlanOpKind::DeleteJunction),
            "Planned cascade"
        );
        Ok(plan)
    }

    pub fn plan_save(&self, graph: &InstanceGraph, root: InstanceId) -> Result<PersistencePlan> {
        self.plan(graph, root, PlanMode::Save)
    }

    pub fn plan_remove(&self, graph: &InstanceGraph, root: InstanceId) -> Result<PersistencePlan> {
        self.plan(graph, root, PlanMode::Remove)
    }
}

/// Plan with the default configuration.
pub fn plan(
    store: &RelationDescriptorStore,
    graph: &InstanceGraph,
    root: InstanceId,
    mode: PlanMode,
) -> Result<PersistencePlan> {
    CascadePlanner::new(store).plan(graph, root, mode)
}

// ============================================================================
// Plan construction
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Planned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeAction {
    Insert,
    Update,
    Delete,
    /// Null the listed relations' foreign keys.
    Nullify(Vec<RelationId>),
}

#[derive(Debug)]
struct Node {
    instance: InstanceId,
    entity: EntityId,
    action: NodeAction,
    state: VisitState,
    /// Sequence number assigned on reaching `Planned`; orders otherwise-free nodes.
    order: usize,
    foreign_keys: Vec<ForeignKeyBinding>,
    /// Bindings written as NULL on insert and set by a follow-up update.
    deferred: Vec<RelationId>,
    /// Foreign keys nulled before any delete runs.
    prenull: Vec<RelationId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    /// `before` is an insert that `after` references.
    Insert,
    /// `after` is a delete that `before` still references.
    Delete,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    before: usize,
    after: usize,
    /// Node whose foreign key creates the dependency.
    holder: usize,
    relation: RelationId,
    /// The foreign key is nullable, so the dependency can be split.
    breakable: bool,
    kind: EdgeKind,
}

#[derive(Debug, Clone, Copy)]
struct JunctionRow {
    relation: RelationId,
    owner: InstanceId,
    inverse: InstanceId,
}

enum Inclusion {
    /// Part of the plan (now or already).
    Planned,
    /// Stored row referenced by key only.
    Reference,
    /// Unsaved and not cascaded; the relation is left unset.
    Skipped,
}

struct Builder<'a> {
    store: &'a RelationDescriptorStore,
    graph: &'a InstanceGraph,
    config: &'a PlannerConfig,
    nodes: Vec<Node>,
    index: HashMap<InstanceIdentity, usize>,
    seq: usize,
    /// Parent implied by collection membership: `(child, child's owning relation) -> parent`.
    implied: HashMap<(InstanceId, RelationId), InstanceId>,
    junction_inserts: Vec<JunctionRow>,
    junction_deletes: Vec<JunctionRow>,
    junction_seen: HashSet<(bool, RelationId, InstanceIdentity, InstanceIdentity)>,
    orphan_deletes: Vec<InstanceId>,
    pending_nullify: Vec<(InstanceId, RelationId)>,
}

fn dedup(ids: &[InstanceId]) -> Vec<InstanceId> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

impl<'a> Builder<'a> {
    fn new(
        store: &'a RelationDescriptorStore,
        graph: &'a InstanceGraph,
        config: &'a PlannerConfig,
    ) -> Self {
        Self {
            store,
            graph,
            config,
            nodes: Vec::new(),
            index: HashMap::new(),
            seq: 0,
            implied: HashMap::new(),
            junction_inserts: Vec::new(),
            junction_deletes: Vec::new(),
            junction_seen: HashSet::new(),
            orphan_deletes: Vec::new(),
            pending_nullify: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    fn instance(&self, id: InstanceId) -> Result<&'a EntityInstance> {
        let graph = self.graph;
        graph.get(id).ok_or_else(|| {
            Error::Planning(PlanningError::new(
                PlanningErrorKind::UnknownInstance,
                "<unknown>",
                format!("instance #{} is not part of the graph", id.index()),
            ))
        })
    }

    fn identify(&self, id: InstanceId) -> Result<(InstanceIdentity, EntityId)> {
        InstanceIdentity::of(self.store, self.graph, id).map_err(Error::from)
    }

    fn describe(&self, id: InstanceId) -> String {
        match self.graph.get(id) {
            Some(inst) => match self.store.entity_by_name(inst.entity()) {
                Some(entity) => describe(entity, inst, id),
                None => format!("{}(#{})", inst.entity(), id.index()),
            },
            None => format!("#{}", id.index()),
        }
    }

    fn error(
        &self,
        kind: PlanningErrorKind,
        at: InstanceId,
        relation: Option<&str>,
        message: String,
    ) -> Error {
        let entity = self.graph.get(at).map_or("<unknown>", |i| i.entity());
        let mut err = PlanningError::new(kind, entity, message).with_instance(self.describe(at));
        if let Some(relation) = relation {
            err = err.with_relation(relation);
        }
        Error::Planning(err)
    }

    /// The loaded slot for `rel` on `id`, checked against the relation's shape.
    fn slot(&self, id: InstanceId, rel: &RelationDescriptor) -> Result<Option<&'a RelationValue>> {
        let Some(value) = self.instance(id)?.relation(&rel.property) else {
            return Ok(None);
        };
        let shape_ok = match value {
            RelationValue::One(_) => !rel.is_collection(),
            RelationValue::Many(_) => rel.is_collection(),
        };
        if !shape_ok {
            return Err(self.error(
                PlanningErrorKind::RelationShapeMismatch,
                id,
                Some(&rel.property),
                format!("{} relation holds the wrong kind of value", rel.kind),
            ));
        }
        Ok(Some(value))
    }

    fn relations(&self, entity: EntityId) -> Vec<&'a RelationDescriptor> {
        let store = self.store;
        store.relations_of(entity).collect()
    }

    fn owning_side(&self, rel: &RelationDescriptor) -> &'a RelationDescriptor {
        let store = self.store;
        store.owning_side(rel.id).unwrap_or_else(|| store.relation(rel.id))
    }

    fn check_depth(&self, id: InstanceId, depth: usize) -> Result<()> {
        if depth > self.config.max_depth {
            return Err(self.error(
                PlanningErrorKind::MaxDepthExceeded,
                id,
                None,
                format!("cascade exceeded {} relation hops", self.config.max_depth),
            ));
        }
        Ok(())
    }

    fn open(
        &mut self,
        instance: InstanceId,
        entity: EntityId,
        identity: InstanceIdentity,
        action: NodeAction,
    ) -> usize {
        let idx = self.nodes.len();
        tracing::trace!(instance = %self.describe(instance), ?action, "Visiting instance");
        self.nodes.push(Node {
            instance,
            entity,
            action,
            state: VisitState::Visiting,
            order: usize::MAX,
            foreign_keys: Vec::new(),
            deferred: Vec::new(),
            prenull: Vec::new(),
        });
        self.index.insert(identity, idx);
        idx
    }

    fn finish(&mut self, idx: usize) {
        let node = &mut self.nodes[idx];
        debug_assert_eq!(node.state, VisitState::Visiting);
        node.state = VisitState::Planned;
        node.order = self.seq;
        self.seq += 1;
    }

    fn planned_action(&self, id: InstanceId) -> Result<Option<&NodeAction>> {
        let (identity, _) = self.identify(id)?;
        Ok(self.index.get(&identity).map(|&idx| &self.nodes[idx].action))
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    fn visit_save(&mut self, id: InstanceId, depth: usize) -> Result<usize> {
        let (identity, entity) = self.identify(id)?;
        if let Some(&idx) = self.index.get(&identity) {
            return Ok(idx);
        }
        self.check_depth(id, depth)?;

        let action = if self.instance(id)?.is_persisted() {
            NodeAction::Update
        } else {
            self.check_insert_key(id, entity)?;
            NodeAction::Insert
        };
        let idx = self.open(id, entity, identity, action);

        // Rows this one references must exist first.
        let relations = self.relations(entity);
        for rel in &relations {
            match rel.kind {
                RelationKind::OneToOne | RelationKind::ManyToOne if rel.is_owning_side => {
                    self.save_reference(id, rel, depth)?;
                }
                RelationKind::ManyToMany => self.save_links(id, rel, depth)?,
                _ => {}
            }
        }
        self.finish(idx);

        // Rows referencing this one follow it.
        for rel in &relations {
            if !rel.is_owning_side
                && matches!(rel.kind, RelationKind::OneToOne | RelationKind::OneToMany)
            {
                self.save_dependents(id, rel, depth)?;
            }
        }
        Ok(idx)
    }

    /// A new row must carry every key column the store does not generate.
    fn check_insert_key(&self, id: InstanceId, entity: EntityId) -> Result<()> {
        let descriptor = self.store.entity(entity);
        let inst = self.instance(id)?;
        let missing: Vec<&str> = descriptor
            .primary_columns
            .iter()
            .filter(|c| !c.generated && inst.value(&c.name).is_none_or(Value::is_null))
            .map(|c| c.name.as_str())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(self.error(
            PlanningErrorKind::CompositeKeyArityMismatch,
            id,
            None,
            format!(
                "new instance has no value for key column(s) {}",
                missing.join(", ")
            ),
        ))
    }

    /// Decide whether `target`, reached from `from` through `rel`, joins the plan.
    ///
    /// `nullable` is the nullability of the foreign key linking the two.
    fn include_for_save(
        &mut self,
        from: InstanceId,
        rel: &RelationDescriptor,
        target: InstanceId,
        nullable: bool,
        depth: usize,
    ) -> Result<Inclusion> {
        let (identity, _) = self.identify(target)?;
        if self.index.contains_key(&identity) {
            return Ok(Inclusion::Planned);
        }

        if self.instance(target)?.is_persisted() {
            if rel.cascade.update {
                self.visit_save(target, depth + 1)?;
                return Ok(Inclusion::Planned);
            }
            return Ok(Inclusion::Reference);
        }

        if rel.cascade.insert {
            self.visit_save(target, depth + 1)?;
            Ok(Inclusion::Planned)
        } else if nullable {
            tracing::warn!(
                entity = %self.describe(from),
                relation = %rel.property,
                target = %self.describe(target),
                "Related instance is unsaved and cascade insert is off; leaving relation unset"
            );
            Ok(Inclusion::Skipped)
        } else {
            Err(self.error(
                PlanningErrorKind::UnsavedRelationWithoutCascade,
                from,
                Some(&rel.property),
                format!(
                    "{} is not saved, cascade insert is off and the relation is not nullable",
                    self.describe(target)
                ),
            ))
        }
    }

    fn save_reference(&mut self, from: InstanceId, rel: &RelationDescriptor, depth: usize) -> Result<()> {
        if let Some(RelationValue::One(Some(target))) = self.slot(from, rel)? {
            self.include_for_save(from, rel, *target, rel.nullable, depth)?;
        }
        Ok(())
    }

    fn save_links(&mut self, from: InstanceId, rel: &RelationDescriptor, depth: usize) -> Result<()> {
        let Some(slot) = self.slot(from, rel)? else {
            return Ok(());
        };
        let members = dedup(slot.members());
        let owning = self.owning_side(rel);
        let graph = self.graph;
        let snapshot = if self.config.diff_removal {
            graph.tracker().get(from, &rel.property)
        } else {
            None
        };

        for &member in &members {
            let inclusion = self.include_for_save(from, rel, member, rel.nullable, depth)?;
            if matches!(inclusion, Inclusion::Skipped) {
                continue;
            }
            // Links present in the snapshot are already stored.
            if snapshot.is_some_and(|s| s.contains(member)) {
                continue;
            }
            self.push_junction(true, owning, rel, from, member)?;
        }

        if let Some(snapshot) = snapshot {
            for &removed in snapshot.members() {
                if members.contains(&removed) {
                    continue;
                }
                self.push_junction(false, owning, rel, from, removed)?;
                if rel.cascade.remove {
                    self.orphan_deletes.push(removed);
                }
            }
        }
        Ok(())
    }

    fn save_dependents(
        &mut self,
        from: InstanceId,
        rel: &RelationDescriptor,
        depth: usize,
    ) -> Result<()> {
        let Some(slot) = self.slot(from, rel)? else {
            return Ok(());
        };
        let store = self.store;
        let Some(inverse) = store.inverse_of(rel.id) else {
            return Ok(());
        };
        let members = dedup(slot.members());

        for &child in &members {
            self.implied.insert((child, inverse.id), from);
            self.include_for_save(from, rel, child, inverse.nullable, depth)?;
        }

        if !rel.is_collection() || !self.config.diff_removal {
            return Ok(());
        }
        let graph = self.graph;
        let Some(removed) = graph.tracker().removed_members(from, &rel.property, &members) else {
            tracing::debug!(
                entity = %self.describe(from),
                relation = %rel.property,
                "No snapshot for collection; skipping removal by absence"
            );
            return Ok(());
        };

        for orphan in removed {
            let inst = self.instance(orphan)?;
            if !inst.is_persisted() {
                continue;
            }
            // Moved to another parent rather than dropped.
            if let Some(RelationValue::One(Some(parent))) = inst.relation(&inverse.property) {
                if *parent != from {
                    continue;
                }
            }
            if rel.cascade.remove {
                self.orphan_deletes.push(orphan);
            } else if self.config.orphan_action == OrphanAction::Nullify && inverse.nullable {
                self.pending_nullify.push((orphan, inverse.id));
            } else {
                tracing::warn!(
                    entity = %self.describe(from),
                    relation = %rel.property,
                    orphan = %self.describe(orphan),
                    "Removed from collection but left untouched"
                );
            }
        }
        Ok(())
    }

    /// Record a junction insert (`insert = true`) or delete between `from` and `member`.
    fn push_junction(
        &mut self,
        insert: bool,
        owning: &RelationDescriptor,
        traversed: &RelationDescriptor,
        from: InstanceId,
        member: InstanceId,
    ) -> Result<()> {
        let (owner, inverse) = if traversed.is_owning_side {
            (from, member)
        } else {
            (member, from)
        };
        if !insert && !(self.instance(owner)?.is_persisted() && self.instance(inverse)?.is_persisted()) {
            return Ok(());
        }
        let (owner_identity, _) = self.identify(owner)?;
        let (inverse_identity, _) = self.identify(inverse)?;
        if !self
            .junction_seen
            .insert((insert, owning.id, owner_identity, inverse_identity))
        {
            return Ok(());
        }
        let row = JunctionRow {
            relation: owning.id,
            owner,
            inverse,
        };
        if insert {
            self.junction_inserts.push(row);
        } else {
            self.junction_deletes.push(row);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Remove
    // ------------------------------------------------------------------

    fn visit_remove(&mut self, id: InstanceId, depth: usize) -> Result<Option<usize>> {
        let (identity, entity) = self.identify(id)?;
        if let Some(&idx) = self.index.get(&identity) {
            return Ok(Some(idx));
        }
        if !self.instance(id)?.is_persisted() {
            tracing::trace!(instance = %self.describe(id), "Skipping delete of unsaved instance");
            return Ok(None);
        }
        self.check_depth(id, depth)?;
        let idx = self.open(id, entity, identity, NodeAction::Delete);

        // Rows referencing this one go first.
        let relations = self.relations(entity);
        for rel in &relations {
            match rel.kind {
                RelationKind::OneToMany => self.remove_dependents(id, rel, depth)?,
                RelationKind::OneToOne if !rel.is_owning_side => {
                    self.remove_dependents(id, rel, depth)?;
                }
                RelationKind::ManyToMany => self.remove_links(id, rel, depth)?,
                _ => {}
            }
        }
        self.remove_referrers(id, entity, depth)?;
        self.finish(idx);

        // Rows this one references go after it.
        for rel in &relations {
            if rel.holds_foreign_key() && rel.cascade.remove {
                if let Some(RelationValue::One(Some(target))) = self.slot(id, rel)? {
                    self.visit_remove(*target, depth + 1)?;
                }
            }
        }
        Ok(Some(idx))
    }

    fn remove_dependents(
        &mut self,
        parent: InstanceId,
        rel: &RelationDescriptor,
        depth: usize,
    ) -> Result<()> {
        let store = self.store;
        let Some(inverse) = store.inverse_of(rel.id) else {
            return Ok(());
        };
        let Some(slot) = self.slot(parent, rel)? else {
            return Ok(());
        };
        let mut members = dedup(slot.members());
        if rel.is_collection() && rel.cascade.remove && self.config.diff_removal {
            let graph = self.graph;
            if let Some(removed) = graph.tracker().removed_members(parent, &rel.property, &members) {
                members.extend(removed);
            }
        }

        for child in members {
            self.implied.insert((child, inverse.id), parent);
            self.remove_dependent(parent, Some(rel), inverse, child, depth)?;
        }
        Ok(())
    }

    /// Dependents found by scanning the graph for foreign keys pointing at `parent`.
    fn remove_referrers(&mut self, parent: InstanceId, entity: EntityId, depth: usize) -> Result<()> {
        let store = self.store;
        let graph = self.graph;
        let referrers: Vec<(InstanceId, &str)> = graph.referrers(parent).collect();
        for (child, property) in referrers {
            let (_, child_entity) = self.identify(child)?;
            let Some(owning) = store.find_relation(child_entity, property) else {
                continue;
            };
            if !owning.holds_foreign_key() || owning.target != entity {
                continue;
            }
            let via = owning.inverse.map(|inv| store.relation(inv));
            self.remove_dependent(parent, via, owning, child, depth)?;
        }
        Ok(())
    }

    /// Handle one row whose `owning` foreign key references `parent`, which is being deleted.
    ///
    /// `via` is the relation traversed from the parent, if it declares one.
    fn remove_dependent(
        &mut self,
        parent: InstanceId,
        via: Option<&RelationDescriptor>,
        owning: &RelationDescriptor,
        child: InstanceId,
        depth: usize,
    ) -> Result<()> {
        if matches!(self.planned_action(child)?, Some(NodeAction::Delete)) {
            return Ok(());
        }
        if !self.instance(child)?.is_persisted() {
            return Ok(());
        }
        if via.is_some_and(|r| r.cascade.remove) {
            self.visit_remove(child, depth + 1)?;
            return Ok(());
        }

        let relation_name = via.map_or_else(
            || format!("{}.{}", self.instance(child).map_or("?", |i| i.entity()), owning.property),
            |r| r.property.clone(),
        );
        if !owning.nullable {
            return match owning.on_delete {
                OnDelete::Cascade => {
                    self.visit_remove(child, depth + 1)?;
                    Ok(())
                }
                OnDelete::Restrict => Err(self.error(
                    PlanningErrorKind::RestrictedDeleteViolation,
                    parent,
                    Some(&relation_name),
                    format!(
                        "{} still references it through non-nullable '{}' (ON DELETE RESTRICT)",
                        self.describe(child),
                        owning.property
                    ),
                )),
                OnDelete::SetNull => Err(self.error(
                    PlanningErrorKind::SetNullOnNonNullable,
                    parent,
                    Some(&relation_name),
                    format!(
                        "cannot null non-nullable '{}' on {}",
                        owning.property,
                        self.describe(child)
                    ),
                )),
            };
        }

        if owning.on_delete == OnDelete::SetNull {
            self.pending_nullify.push((child, owning.id));
        } else {
            tracing::debug!(
                parent = %self.describe(parent),
                dependent = %self.describe(child),
                on_delete = owning.on_delete.as_sql(),
                "Leaving nullable dependent to the database's referential action"
            );
        }
        Ok(())
    }

    fn remove_links(&mut self, id: InstanceId, rel: &RelationDescriptor, depth: usize) -> Result<()> {
        let Some(slot) = self.slot(id, rel)? else {
            return Ok(());
        };
        let owning = self.owning_side(rel);
        let mut members = dedup(slot.members());
        if self.config.diff_removal {
            let graph = self.graph;
            if let Some(removed) = graph.tracker().removed_members(id, &rel.property, &members) {
                members.extend(removed);
            }
        }

        for member in members {
            self.push_junction(false, owning, rel, id, member)?;
            if rel.cascade.remove {
                self.visit_remove(member, depth + 1)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    fn finalize(mut self) -> Result<PersistencePlan> {
        // Orphans still reachable elsewhere in the plan stay.
        for orphan in std::mem::take(&mut self.orphan_deletes) {
            if self.planned_action(orphan)?.is_none() {
                self.visit_remove(orphan, 1)?;
            }
        }

        for (child, relation) in std::mem::take(&mut self.pending_nullify) {
            let (identity, entity) = self.identify(child)?;
            match self.index.get(&identity) {
                Some(&idx) => {
                    if let NodeAction::Nullify(relations) = &mut self.nodes[idx].action {
                        if !relations.contains(&relation) {
                            relations.push(relation);
                        }
                    }
                }
                None => {
                    let idx = self.open(child, entity, identity, NodeAction::Nullify(vec![relation]));
                    self.finish(idx);
                }
            }
        }

        let edges = self.link()?;
        let order = self.sort(&edges)?;
        Ok(self.emit(&order))
    }

    /// Current foreign key target of `instance` for `rel`.
    ///
    /// `None` if the relation is not loaded; `Some(None)` for an explicit null.
    fn referenced(&self, instance: InstanceId, rel: &RelationDescriptor) -> Result<Option<Option<InstanceId>>> {
        if let Some(&parent) = self.implied.get(&(instance, rel.id)) {
            return Ok(Some(Some(parent)));
        }
        match self.slot(instance, rel)? {
            Some(RelationValue::One(target)) => Ok(Some(*target)),
            _ => Ok(None),
        }
    }

    fn node_of(&self, id: InstanceId) -> Result<Option<usize>> {
        let (identity, _) = self.identify(id)?;
        Ok(self.index.get(&identity).copied())
    }

    /// Compute foreign key bindings and the dependency edges they imply.
    fn link(&mut self) -> Result<Vec<Edge>> {
        let store = self.store;
        let mut edges = Vec::new();

        for idx in 0..self.nodes.len() {
            let instance = self.nodes[idx].instance;
            let entity = self.nodes[idx].entity;
            let action = self.nodes[idx].action.clone();

            match action {
                NodeAction::Insert | NodeAction::Update => {
                    let mut bindings = Vec::new();
                    for rel in store.relations_of(entity).filter(|r| r.holds_foreign_key()) {
                        let Some(target) = self.referenced(instance, rel)? else {
                            continue;
                        };
                        let bound = match target {
                            None => None,
                            Some(target) => match self.node_of(target)? {
                                Some(t) if self.nodes[t].action == NodeAction::Insert => {
                                    if t == idx {
                                        self.defer_self_reference(idx, rel)?;
                                    } else {
                                        edges.push(Edge {
                                            before: t,
                                            after: idx,
                                            holder: idx,
                                            relation: rel.id,
                                            breakable: rel.nullable,
                                            kind: EdgeKind::Insert,
                                        });
                                    }
                                    Some(target)
                                }
                                _ if self.instance(target)?.is_persisted() => Some(target),
                                // Unsaved and left out of the plan.
                                _ => None,
                            },
                        };
                        bindings.push(ForeignKeyBinding {
                            relation: rel.id,
                            target: bound,
                        });
                    }
                    self.nodes[idx].foreign_keys = bindings;
                }
                NodeAction::Delete => {
                    for rel in store.relations_of(entity).filter(|r| r.holds_foreign_key()) {
                        if let Some(Some(target)) = self.referenced(instance, rel)? {
                            if let Some(t) = self.node_of(target)? {
                                if t != idx && self.nodes[t].action == NodeAction::Delete {
                                    edges.push(Edge {
                                        before: idx,
                                        after: t,
                                        holder: idx,
                                        relation: rel.id,
                                        breakable: rel.nullable,
                                        kind: EdgeKind::Delete,
                                    });
                                }
                            }
                        }
                    }
                }
                NodeAction::Nullify(relations) => {
                    for relation in relations {
                        let rel = store.relation(relation);
                        if let Some(Some(target)) = self.referenced(instance, rel)? {
                            if let Some(t) = self.node_of(target)? {
                                if self.nodes[t].action == NodeAction::Delete {
                                    edges.push(Edge {
                                        before: idx,
                                        after: t,
                                        holder: idx,
                                        relation,
                                        breakable: false,
                                        kind: EdgeKind::Delete,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(edges)
    }

    fn defer_self_reference(&mut self, idx: usize, rel: &RelationDescriptor) -> Result<()> {
        if rel.nullable {
            self.nodes[idx].deferred.push(rel.id);
            return Ok(());
        }
        let instance = self.nodes[idx].instance;
        Err(self.error(
            PlanningErrorKind::CyclicForeignKeyDependency,
            instance,
            Some(&rel.property),
            "a new row cannot reference itself through a non-nullable foreign key".to_string(),
        ))
    }

    /// Order nodes so every edge points forward, splitting nullable foreign
    /// keys where the graph has cycles.
    fn sort(&mut self, edges: &[Edge]) -> Result<Vec<usize>> {
        let n = self.nodes.len();
        let mut active = vec![true; edges.len()];
        let mut indegree = vec![0usize; n];
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (e, edge) in edges.iter().enumerate() {
            indegree[edge.after] += 1;
            outgoing[edge.before].push(e);
        }

        let mut ready: BinaryHeap<Reverse<(usize, usize)>> = (0..n)
            .filter(|&i| indegree[i] == 0)
            .map(|i| Reverse((self.nodes[i].order, i)))
            .collect();
        let mut order = Vec::with_capacity(n);

        while order.len() < n {
            if let Some(Reverse((_, i))) = ready.pop() {
                order.push(i);
                for &e in &outgoing[i] {
                    if active[e] {
                        active[e] = false;
                        let after = edges[e].after;
                        indegree[after] -= 1;
                        if indegree[after] == 0 {
                            ready.push(Reverse((self.nodes[after].order, after)));
                        }
                    }
                }
                continue;
            }

            // Every remaining node waits on a cycle: split one nullable foreign key.
            let candidate = edges
                .iter()
                .enumerate()
                .filter(|(e, edge)| active[*e] && edge.breakable)
                .min_by_key(|(_, edge)| (self.nodes[edge.holder].order, edge.relation));
            let Some((e, edge)) = candidate else {
                return Err(self.cycle_error(&order));
            };

            active[e] = false;
            indegree[edge.after] -= 1;
            let holder = &mut self.nodes[edge.holder];
            match edge.kind {
                EdgeKind::Insert => holder.deferred.push(edge.relation),
                EdgeKind::Delete => holder.prenull.push(edge.relation),
            }
            tracing::debug!(
                instance = %self.describe(self.nodes[edge.holder].instance),
                relation = %self.store.relation(edge.relation).property,
                kind = ?edge.kind,
                "Splitting foreign key to break a dependency cycle"
            );
            if indegree[edge.after] == 0 {
                ready.push(Reverse((self.nodes[edge.after].order, edge.after)));
            }
        }
        Ok(order)
    }

    fn cycle_error(&self, emitted: &[usize]) -> Error {
        let stuck: Vec<String> = (0..self.nodes.len())
            .filter(|i| !emitted.contains(i))
            .map(|i| self.describe(self.nodes[i].instance))
            .collect();
        let first = (0..self.nodes.len())
            .find(|i| !emitted.contains(i))
            .map_or(InstanceId::from_index(usize::MAX), |i| self.nodes[i].instance);
        self.error(
            PlanningErrorKind::CyclicForeignKeyDependency,
            first,
            None,
            format!(
                "rows depend on each other only through non-nullable foreign keys: {}",
                stuck.join(", ")
            ),
        )
    }

    fn emit(&self, order: &[usize]) -> PersistencePlan {
        let mut ops = Vec::new();

        for row in &self.junction_deletes {
            ops.push(PlanOp::DeleteJunction {
                relation: row.relation,
                owner: row.owner,
                inverse: row.inverse,
            });
        }

        for &idx in order {
            let node = &self.nodes[idx];
            for &relation in &node.prenull {
                ops.push(PlanOp::UpdateForeignKey {
                    instance: node.instance,
                    entity: node.entity,
                    binding: ForeignKeyBinding {
                        relation,
                        target: None,
                    },
                });
            }
        }

        for &idx in order {
            let node = &self.nodes[idx];
            let foreign_keys = || {
                node.foreign_keys
                    .iter()
                    .map(|b| ForeignKeyBinding {
                        relation: b.relation,
                        target: if node.deferred.contains(&b.relation) {
                            None
                        } else {
                            b.target
                        },
                    })
                    .collect::<Vec<_>>()
            };
            match &node.action {
                NodeAction::Insert => ops.push(PlanOp::Insert {
                    instance: node.instance,
                    entity: node.entity,
                    foreign_keys: foreign_keys(),
                }),
                NodeAction::Update => ops.push(PlanOp::Update {
                    instance: node.instance,
                    entity: node.entity,
                    foreign_keys: foreign_keys(),
                }),
                NodeAction::Delete => ops.push(PlanOp::Delete {
                    instance: node.instance,
                    entity: node.entity,
                }),
                NodeAction::Nullify(relations) => {
                    for &relation in relations {
                        ops.push(PlanOp::UpdateForeignKey {
                            instance: node.instance,
                            entity: node.entity,
                            binding: ForeignKeyBinding {
                                relation,
                                target: None,
                            },
                        });
                    }
                }
            }
        }

        for &idx in order {
            let node = &self.nodes[idx];
            for binding in node
                .foreign_keys
                .iter()
                .filter(|b| node.deferred.contains(&b.relation))
            {
                ops.push(PlanOp::UpdateForeignKey {
                    instance: node.instance,
                    entity: node.entity,
                    binding: *binding,
                });
            }
        }

        for row in &self.junction_inserts {
            ops.push(PlanOp::InsertJunction {
                relation: row.relation,
                owner: row.owner,
                inverse: row.inverse,
            });
        }

        PersistencePlan::from_ops(ops)
    }
}
