//! Integration tests for the given-when-then test utilities.
//! Run with `cargo test --features test-util`.

#![cfg(feature = "test-util")]

use ripl::{
    Aggregate, CreateChildTemplate, CreateTemplate, EventKind, PreConditionError, Precondition,
    Relationships, UpdateChildTemplate, UpdatePrecondition, UpdateTemplate, test::TestFramework,
};

// ============================================================================
// Test Domain: Garage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Aggregate)]
#[aggregate(children(Car), derives(Debug, PartialEq))]
struct Garage {
    name: String,
    capacity: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct Car {
    plate: String,
    mileage: u64,
}

fn relationships() -> Relationships<GarageKind> {
    Relationships::new()
        .with(GarageKind::Garage, GarageKind::Car, "parked")
        .unwrap()
        .with(GarageKind::Car, GarageKind::Car, "trailer")
        .unwrap()
}

fn open_garage() -> CreateTemplate<Garage, (String, usize)> {
    CreateTemplate::new(
        Precondition::new("garage holds a car", |(_, capacity): &(String, usize)| {
            *capacity > 0
        }),
        |_, (name, capacity): (String, usize)| Garage { name, capacity },
    )
}

fn resize() -> UpdateTemplate<Garage, usize> {
    UpdateTemplate::new(
        UpdatePrecondition::new("capacity only grows", |garage: &Garage, capacity: &usize| {
            *capacity > garage.capacity
        }),
        |garage: &mut Garage, capacity: &usize| garage.capacity = *capacity,
    )
}

fn park() -> CreateChildTemplate<Garage, Car, String> {
    CreateChildTemplate::new(
        Precondition::new("plate is set", |plate: &String| !plate.is_empty()),
        |_, plate: String| Car { plate, mileage: 0 },
    )
}

fn drive(role: &'static str) -> UpdateChildTemplate<Garage, Car, u64> {
    UpdateChildTemplate::new(
        role,
        UpdatePrecondition::always(),
        |car: &mut Car, miles: &u64| car.mileage += miles,
    )
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn create_then_update() {
    let framework = TestFramework::<Garage>::given(relationships());
    let garage = framework
        .when(open_garage().using(("north".to_string(), 2)))
        .then_expect_event(EventKind::Created);
    assert_eq!(garage.body().name, "north");

    framework
        .when(resize().using(&garage, 4))
        .then_expect(|garage| {
            assert_eq!(garage.version(), 2);
            assert_eq!(garage.body().capacity, 4);
        });
}

#[test]
fn precondition_failures_name_the_rule() {
    let framework = TestFramework::<Garage>::given(relationships());

    framework
        .when(open_garage().using(("empty".to_string(), 0)))
        .then_expect_precondition_failure("garage holds a car");

    let garage = framework
        .when(open_garage().using(("south".to_string(), 3)))
        .then_expect_version(1);
    framework
        .when(resize().using(&garage, 2))
        .then_expect_error_eq(&PreConditionError::RuleFailed {
            rule: "capacity only grows".to_string(),
        });
}

#[test]
fn recursive_children_propagate_to_root() {
    let framework = TestFramework::<Garage>::given(relationships());
    let garage = framework
        .when(open_garage().using(("east".to_string(), 2)))
        .then_expect_version(1);

    let command = park().using(&garage, garage.id(), "parked", "AB12 CDE".to_string());
    let car_id = command.child_id();
    let garage = framework
        .when(command)
        .then_expect_event(EventKind::ChildCreated);

    let command = park().using(&garage, car_id, "trailer", "TR41 LER".to_string());
    let trailer_id = command.child_id();
    let garage = framework.when(command).then_expect_version(3);
    assert_eq!(garage.root_of(trailer_id).unwrap(), garage.id());

    let garage = framework
        .when(drive("trailer").using(&garage, trailer_id, 120))
        .then_expect_version(4);
    assert_eq!(garage.descendant(car_id).unwrap().version(), 3);
    assert_eq!(
        garage.get_descendant::<Car>(trailer_id).unwrap().mileage,
        120
    );

    framework
        .when(drive("parked").using(&garage, trailer_id, 5))
        .then_expect_precondition_failure("is not held by its parent as `parked`");
}

#[test]
fn undeclared_role_is_reported() {
    let framework = TestFramework::<Garage>::given(relationships());
    let garage = framework
        .when(open_garage().using(("west".to_string(), 1)))
        .then_expect_version(1);

    framework
        .when(park().using(&garage, garage.id(), "towed", "XY99 ZZZ".to_string()))
        .then_expect_precondition_failure("role `towed` does not identify a relationship of `garage`");
}

#[test]
fn snapshot_interval_is_carried_into_events() {
    let framework = TestFramework::<Garage>::given(relationships()).with_snapshot_interval(2);
    let garage = framework
        .when(open_garage().using(("depot".to_string(), 1)))
        .then_expect_version(1);
    let garage = framework
        .when(resize().using(&garage, 2))
        .then_expect_version(2);

    let (event, next) = framework
        .when(resize().using(&garage, 3))
        .inspect_result()
        .unwrap();
    assert_eq!(event.version(), 3);
    assert!(!event.requires_snapshot());
    assert_eq!(next.snapshot_id(), garage.snapshot_id());
    assert_eq!(next.snapshot_interval(), 2);
}
