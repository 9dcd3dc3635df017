//! Ride domain types and the host-facing control surface.

use serde::{Deserialize, Serialize};

/// Vehicle classes the assistant may select for a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Vehicle {
    Bike,
    Auto,
    Car,
}

impl Vehicle {
    /// Parses the wire name used by the `controlRide` tool.
    ///
    /// Matching is case-sensitive: anything other than `BIKE`, `AUTO` or
    /// `CAR` is rejected and the caller leaves the current selection alone.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "BIKE" => Some(Self::Bike),
            "AUTO" => Some(Self::Auto),
            "CAR" => Some(Self::Car),
            _ => None,
        }
    }

    /// The wire name the remote model uses for this vehicle class.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Bike => "BIKE",
            Self::Auto => "AUTO",
            Self::Car => "CAR",
        }
    }
}

/// Host-side control surface driven by the tool dispatcher.
///
/// Implementations mutate whatever state backs the booking UI. The setters
/// are synchronous and must not block: they run on the session's dispatch
/// path between inbound events.
#[cfg_attr(test, mockall::automock)]
pub trait RideControls: Send {
    fn set_pickup(&mut self, pickup: &str);
    fn set_destination(&mut self, destination: &str);
    fn set_vehicle(&mut self, vehicle: Vehicle);
    /// Navigate the host to the booking view once a tool call completes.
    fn show_booking(&mut self);
}

/// Minimal in-memory ride state. Used by the CLI host and as a plain
/// [`RideControls`] implementation in tests.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RideDraft {
    pub pickup: Option<String>,
    pub destination: Option<String>,
    pub vehicle: Option<Vehicle>,
}

impl RideControls for RideDraft {
    fn set_pickup(&mut self, pickup: &str) {
        self.pickup = Some(pickup.to_string());
    }

    fn set_destination(&mut self, destination: &str) {
        self.destination = Some(destination.to_string());
    }

    fn set_vehicle(&mut self, vehicle: Vehicle) {
        self.vehicle = Some(vehicle);
    }

    fn show_booking(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_wire_names_round_trip() {
        for vehicle in [Vehicle::Bike, Vehicle::Auto, Vehicle::Car] {
            assert_eq!(Vehicle::from_wire(vehicle.wire_name()), Some(vehicle));
        }
    }

    #[test]
    fn vehicle_parse_is_case_sensitive() {
        assert_eq!(Vehicle::from_wire("car"), None);
        assert_eq!(Vehicle::from_wire("Car"), None);
        assert_eq!(Vehicle::from_wire("TRUCK"), None);
        assert_eq!(Vehicle::from_wire(""), None);
    }

    #[test]
    fn ride_draft_applies_setters() {
        let mut draft = RideDraft::default();
        draft.set_pickup("Central Station");
        draft.set_destination("Airport");
        draft.set_vehicle(Vehicle::Auto);
        assert_eq!(draft.pickup.as_deref(), Some("Central Station"));
        assert_eq!(draft.destination.as_deref(), Some("Airport"));
        assert_eq!(draft.vehicle, Some(Vehicle::Auto));
    }
}
