//! End-to-end planning scenarios against the reference grid router.
//!
//! Each test builds a small zone, plans through a [`PlannerContext`], and
//! checks the assembled plan, its sub-actions, and the reservations taken
//! while executing it.

#![allow(
    clippy::unwrap_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::missing_panics_doc,
    clippy::too_many_lines
)]

use posture_graph::{Placement, Slot, WorldObject, WorldState};
use posture_planner::handles::HandleGenerator;
use posture_planner::segment::SegmentFinder;
use posture_planner::{
    ActorSnapshot, CarryRequirement, ExecutionStatus, FailureReason, GoalConstraint, GridRouter,
    PathSpec, PlannerConfig, PlannerContext, SubAction, TransitionAction, sub_actions,
};
use posture_types::{
    Cost, Location, ObjectId, PostureKind, Priority, Region, SequenceTag, SlotRef, SlotType,
    SpatialConstraint, StateSpec, TransitionKind, Vec2,
};

// =============================================================================
// Helpers
// =============================================================================

fn context(world: WorldState) -> PlannerContext<GridRouter> {
    let config = PlannerConfig::default();
    let router = GridRouter::new(&world, &config.router, config.routing.cost_per_metre, 20.0);
    PlannerContext::new(world, router, config).unwrap()
}

fn chair_at(world: &mut WorldState, x: f64, y: f64) -> ObjectId {
    let chair = WorldObject::new("chair", Placement::World(Location::new(x, y, 0))).with_posture(PostureKind::Sit);
    let id = chair.id;
    world.add_object(chair).unwrap();
    id
}

fn wall(world: &mut WorldState, x: f64, y: f64, half_x: f64, half_y: f64) -> ObjectId {
    let wall = WorldObject::new("wall", Placement::World(Location::new(x, y, 0)))
        .with_extents(half_x, half_y)
        .as_obstacle();
    let id = wall.id;
    world.add_object(wall).unwrap();
    id
}

fn plan(ctx: &mut PlannerContext<GridRouter>, actor: &ActorSnapshot, goal: &GoalConstraint) -> PathSpec {
    ctx.plan_blocking(actor, goal).unwrap().unwrap()
}

fn animated(actions: &[SubAction]) -> Vec<&TransitionAction> {
    actions
        .iter()
        .filter_map(|a| match a {
            SubAction::Transition(t) => Some(t),
            SubAction::Walk { .. } => None,
        })
        .collect()
}

fn route_total(path: &PathSpec) -> Cost {
    path.routes().fold(Cost::ZERO, |sum, r| sum.saturating_add(r.cost))
}

// =============================================================================
// Planning
// =============================================================================

#[test]
fn walk_to_a_chair_and_sit() {
    let mut world = WorldState::new();
    let chair = chair_at(&mut world, 2.0, 0.0);
    let mut ctx = context(world);
    let actor = ActorSnapshot::standing_at(Location::new(-2.0, 0.0, 0));

    let path = plan(&mut ctx, &actor, &GoalConstraint::posture_on(PostureKind::Sit, chair));

    assert!(path.is_complete());
    assert_eq!(path.final_state(), Some(&StateSpec::posed(PostureKind::Sit, chair)));
    let actions = sub_actions(&path);
    assert!(actions[0].is_walk());
    let kinds: Vec<TransitionKind> = animated(&actions).iter().map(|t| t.kind).collect();
    assert_eq!(kinds, vec![TransitionKind::Sit]);

    let walked = path.routes().next().unwrap();
    let end = walked.end().unwrap();
    let front = ctx.world().front_of(chair, ctx.config().handles.approach_offset).unwrap();
    assert!(end.planar_distance(&front) <= ctx.config().handles.approach_radius + 1e-6);
}

#[test]
fn plan_cost_is_edges_plus_terminal_plus_routes() {
    let mut world = WorldState::new();
    let chair = chair_at(&mut world, 3.0, 1.0);
    let mut ctx = context(world);
    let actor = ActorSnapshot::standing_at(Location::new(-3.0, -1.0, 0));

    let path = plan(&mut ctx, &actor, &GoalConstraint::posture_on(PostureKind::Sit, chair));

    assert_eq!(path.cost.edges, path.edge_cost());
    assert_eq!(path.cost.routes, route_total(&path));
    assert_eq!(
        path.cost.total(),
        path.cost
            .edges
            .saturating_add(path.cost.terminal)
            .saturating_add(path.cost.routes)
    );
    assert!(path.cost.routes > Cost::ZERO);
}

#[test]
fn satisfied_goal_yields_an_empty_plan() {
    let mut world = WorldState::new();
    let chair = chair_at(&mut world, 0.0, 0.0);
    let mut ctx = context(world);
    let actor = ActorSnapshot::standing_at(Location::new(0.0, 0.0, 0))
        .in_state(StateSpec::posed(PostureKind::Sit, chair));

    let path = plan(&mut ctx, &actor, &GoalConstraint::posture_on(PostureKind::Sit, chair));

    assert_eq!(path.len(), 1);
    assert_eq!(path.cost.total(), Cost::ZERO);
    assert!(sub_actions(&path).is_empty());
}

#[test]
fn fetching_a_loose_item_picks_it_up_before_walking_on() {
    let mut world = WorldState::new();
    let cup = WorldObject::new("cup", Placement::World(Location::new(3.0, 0.0, 0)))
        .as_carryable()
        .with_tag("cup");
    let cup_id = cup.id;
    world.add_object(cup).unwrap();
    let mut ctx = context(world);
    let actor = ActorSnapshot::standing_at(Location::new(0.0, 0.0, 0));
    let area = SpatialConstraint::new(0, Region::circle(Vec2::new(-3.0, 0.0), 1.0));
    let goal = GoalConstraint::carry_to(CarryRequirement::Tagged("cup".to_owned()), area);

    let path = plan(&mut ctx, &actor, &goal);

    assert!(path.final_state().unwrap().is_carrying());
    let actions = sub_actions(&path);
    let pickups: Vec<usize> = actions
        .iter()
        .enumerate()
        .filter(|(_, a)| matches!(a, SubAction::Transition(t) if t.kind == TransitionKind::PickUp))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(pickups.len(), 1);
    let SubAction::Transition(pickup) = &actions[pickups[0]] else {
        return;
    };
    assert_eq!(pickup.item, Some(cup_id));
    assert_eq!(pickup.sequence, SequenceTag::Pickup);
    assert!(actions[..pickups[0]].iter().any(SubAction::is_walk));
    assert!(actions[pickups[0]..].iter().any(SubAction::is_walk));

    let end = path.routes().last().unwrap().end().unwrap();
    assert!(goal.contains_location(&end));
}

#[test]
fn fetching_from_a_crate_walks_to_its_front_first() {
    let mut world = WorldState::new();
    let chest = WorldObject::new("crate", Placement::World(Location::new(3.0, 0.0, 0))).as_storage();
    let chest_id = chest.id;
    world.add_object(chest).unwrap();
    let cup = WorldObject::new("cup", Placement::Stored(chest_id))
        .as_carryable()
        .with_tag("cup");
    let cup_id = cup.id;
    world.add_object(cup).unwrap();
    let mut ctx = context(world);
    let actor = ActorSnapshot::standing_at(Location::new(0.0, 0.0, 0));
    let area = SpatialConstraint::new(0, Region::circle(Vec2::new(-3.0, 0.0), 1.0));
    let goal = GoalConstraint::carry_to(CarryRequirement::Tagged("cup".to_owned()), area);

    let path = plan(&mut ctx, &actor, &goal);

    let actions = sub_actions(&path);
    let kinds: Vec<TransitionKind> = animated(&actions).iter().map(|t| t.kind).collect();
    assert_eq!(kinds, vec![TransitionKind::PickUp]);
    assert!(actions[0].is_walk());
    let SubAction::Transition(pickup) = &actions[1] else {
        panic!("expected the pick-up right after the first walk");
    };
    assert_eq!(pickup.item, Some(cup_id));
    assert_eq!(pickup.sequence, SequenceTag::Pickup);
    assert!(actions[2].is_walk());

    let handles = &ctx.config().handles;
    let front = ctx.world().front_of(chest_id, handles.approach_offset).unwrap();
    let at_crate = path.routes().next().unwrap().end().unwrap();
    assert!(at_crate.planar_distance(&front) <= handles.approach_radius + 1e-6);
    let end = path.routes().last().unwrap().end().unwrap();
    assert!(goal.contains_location(&end));
}

#[test]
fn walled_in_chair_reports_no_route() {
    let mut world = WorldState::new();
    let chair = chair_at(&mut world, 2.0, 0.0);
    wall(&mut world, 0.8, 0.0, 0.1, 2.0);
    wall(&mut world, 4.5, 0.0, 0.1, 2.0);
    wall(&mut world, 2.65, 2.0, 1.95, 0.1);
    wall(&mut world, 2.65, -2.0, 1.95, 0.1);
    let mut ctx = context(world);
    let actor = ActorSnapshot::standing_at(Location::new(-3.0, 0.0, 0));

    let planned = ctx
        .plan_blocking(&actor, &GoalConstraint::posture_on(PostureKind::Sit, chair))
        .unwrap();

    let failure = planned.unwrap_err();
    assert_eq!(failure.reason, FailureReason::NoRouteFound);
    assert_eq!(
        ctx.failures().last_for(actor.id).map(|r| r.failure.reason),
        Some(FailureReason::NoRouteFound)
    );
}

#[test]
fn wall_hiding_the_lamp_blocks_the_seat() {
    let mut world = WorldState::new();
    let chair = chair_at(&mut world, 2.0, 0.0);
    let lamp = WorldObject::new("lamp", Placement::World(Location::new(8.0, 0.0, 0)));
    let lamp_id = lamp.id;
    world.add_object(lamp).unwrap();
    let screen = wall(&mut world, 6.0, 0.0, 0.1, 3.0);
    let mut ctx = context(world);
    let actor = ActorSnapshot::standing_at(Location::new(-3.0, 0.0, 0));
    let goal = GoalConstraint::posture_on(PostureKind::Sit, chair).seeing(lamp_id);

    let connectivity = {
        let graph = ctx.graph();
        let source = graph.node_for(&actor.state).unwrap();
        let segments = SegmentFinder::new(graph, ctx.world(), ctx.router(), ctx.config(), &actor, &goal, source)
            .find()
            .unwrap();
        HandleGenerator::new(graph, ctx.world(), ctx.router(), ctx.config(), &goal)
            .connectivity(&actor, segments)
            .unwrap()
    };
    assert!(!connectivity.candidates.is_empty());
    for candidate in &connectivity.candidates {
        assert!(candidate.destination.goals.is_empty());
        assert!(!candidate.destination.blocked.is_empty());
        assert!(candidate.destination.blocked.iter().all(|b| b.blocker == screen));
    }

    let failure = ctx.plan_blocking(&actor, &goal).unwrap().unwrap_err();
    assert_eq!(failure.reason, FailureReason::BlockedBy(screen));
    let route = failure.failure_route.unwrap();
    let front = ctx.world().front_of(chair, ctx.config().handles.approach_offset).unwrap();
    assert!(route.end().unwrap().planar_distance(&front) <= ctx.config().handles.approach_radius + 1e-6);
}

#[test]
fn goal_with_no_matching_node_fails_fast() {
    let mut world = WorldState::new();
    let chair = chair_at(&mut world, 2.0, 0.0);
    let mut ctx = context(world);
    let actor = ActorSnapshot::standing_at(Location::new(0.0, 0.0, 0));

    let planned = ctx
        .plan_blocking(&actor, &GoalConstraint::posture_on(PostureKind::Lie, chair))
        .unwrap();

    assert_eq!(planned.unwrap_err().reason, FailureReason::NoDestinationNode);
    assert_eq!(ctx.failures().len(), 1);
}

// =============================================================================
// Execution and reservations
// =============================================================================

#[test]
fn contested_chair_goes_to_the_higher_priority() {
    let mut world = WorldState::new();
    let chair = chair_at(&mut world, 2.0, 0.0);
    let mut ctx = context(world);
    let goal = GoalConstraint::posture_on(PostureKind::Sit, chair);

    let first = ActorSnapshot::standing_at(Location::new(-2.0, 0.0, 0));
    let second = ActorSnapshot::standing_at(Location::new(-2.0, 1.0, 0));
    let boss = ActorSnapshot::standing_at(Location::new(-2.0, -1.0, 0)).with_priority(Priority::High);
    let first_path = plan(&mut ctx, &first, &goal);
    let second_path = plan(&mut ctx, &second, &goal);
    let boss_path = plan(&mut ctx, &boss, &goal);

    let mut first_run = ctx.start_execution(first_path, first.priority).unwrap();
    assert_eq!(ctx.tick_execution(&mut first_run, 100.0), ExecutionStatus::Running);
    assert_eq!(ctx.reservations().len(), 1);

    let mut second_run = ctx.start_execution(second_path, second.priority).unwrap();
    assert_eq!(
        ctx.tick_execution(&mut second_run, 100.0),
        ExecutionStatus::Failed(FailureReason::ReservationConflict.into())
    );
    assert_eq!(ctx.reservations().len(), 1);

    let mut boss_run = ctx.start_execution(boss_path, boss.priority).unwrap();
    assert_eq!(ctx.tick_execution(&mut boss_run, 100.0), ExecutionStatus::Running);
    assert_eq!(
        ctx.tick_execution(&mut first_run, 0.0),
        ExecutionStatus::Failed(FailureReason::ReservationConflict.into())
    );

    assert_eq!(ctx.tick_execution(&mut boss_run, 0.0), ExecutionStatus::Complete);
    assert!(ctx.reservations().is_empty());
    assert_eq!(ctx.failures().len(), 2);
}

#[test]
fn resetting_an_agent_drops_its_reservations() {
    let mut world = WorldState::new();
    let chair = chair_at(&mut world, 2.0, 0.0);
    let mut ctx = context(world);
    let actor = ActorSnapshot::standing_at(Location::new(-2.0, 0.0, 0));
    let path = plan(&mut ctx, &actor, &GoalConstraint::posture_on(PostureKind::Sit, chair));

    let mut run = ctx.start_execution(path, actor.priority).unwrap();
    ctx.tick_execution(&mut run, 100.0);
    assert_eq!(ctx.reset_agent(actor.id), 1);
    assert!(ctx.reservations().is_empty());
}

// =============================================================================
// Maintenance
// =============================================================================

#[test]
fn removing_a_table_removes_its_contents_from_the_graph() {
    let mut world = WorldState::new();
    let table = WorldObject::new("table", Placement::World(Location::new(0.0, 0.0, 0)))
        .with_extents(0.6, 0.4)
        .as_surface()
        .with_slot(Slot::new(SlotType::Small, Vec2::new(0.2, 0.0), 0.0));
    let table_id = table.id;
    world.add_object(table).unwrap();
    let cup = WorldObject::new(
        "cup",
        Placement::Slot(SlotRef {
            object: table_id,
            index: 0,
        }),
    )
    .as_carryable();
    let cup_id = cup.id;
    world.add_object(cup).unwrap();
    let mut ctx = context(world);
    assert!(!ctx.graph().nodes_referencing(&[table_id]).is_empty());

    let removed = ctx.remove_object(table_id).unwrap();

    assert_eq!(removed, vec![table_id, cup_id]);
    assert!(ctx.graph().nodes_referencing(&removed).is_empty());
    assert!(ctx.graph().verify_symmetry().is_ok());
}

#[test]
fn chair_removed_during_an_overflowed_bulk_edit_cannot_be_planned_to() {
    let mut world = WorldState::new();
    let chair = chair_at(&mut world, 2.0, 0.0);
    let mut config = PlannerConfig::default();
    config.graph.bulk_rebuild_threshold = 0;
    let router = GridRouter::new(&world, &config.router, config.routing.cost_per_metre, 20.0);
    let mut ctx = PlannerContext::new(world, router, config).unwrap();
    let actor = ActorSnapshot::standing_at(Location::new(-2.0, 0.0, 0));

    ctx.begin_bulk_edit();
    let spare = WorldObject::new("chair", Placement::World(Location::new(-4.0, 3.0, 0))).with_posture(PostureKind::Sit);
    ctx.add_object(spare).unwrap();
    ctx.remove_object(chair).unwrap();

    assert!(ctx.graph().nodes_referencing(&[chair]).is_empty());
    let planned = ctx
        .plan_blocking(&actor, &GoalConstraint::posture_on(PostureKind::Sit, chair))
        .unwrap();
    assert_eq!(planned.unwrap_err().reason, FailureReason::NoDestinationNode);

    ctx.end_bulk_edit().unwrap();
    assert!(ctx.graph().nodes_referencing(&[chair]).is_empty());
}

#[test]
fn chairs_added_while_building_is_disabled_appear_afterwards() {
    let mut ctx = context(WorldState::new());
    let before = ctx.graph().node_count();

    let chair = ctx
        .with_building_disabled(|ctx| {
            let chair = WorldObject::new("chair", Placement::World(Location::new(1.0, 1.0, 0)))
                .with_posture(PostureKind::Sit);
            let id = ctx.add_object(chair)?;
            assert_eq!(ctx.graph().node_count(), before);
            Ok(id)
        })
        .unwrap();

    assert!(ctx.graph().node_for(&StateSpec::posed(PostureKind::Sit, chair)).is_some());
    assert!(ctx.graph().verify_symmetry().is_ok());
}

#[test]
fn graph_exports_name_every_node() {
    let mut world = WorldState::new();
    chair_at(&mut world, 0.0, 0.0);
    let ctx = context(world);

    let mut graphml = Vec::new();
    ctx.export_graphml(&mut graphml).unwrap();
    let graphml = String::from_utf8(graphml).unwrap();
    assert_eq!(graphml.matches("<node ").count(), ctx.graph().node_count());

    let json: serde_json::Value = serde_json::from_str(&ctx.export_json().unwrap()).unwrap();
    assert_eq!(
        json["nodes"].as_array().map(Vec::len),
        Some(ctx.graph().node_count())
    );
}
