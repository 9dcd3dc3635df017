//! Tool-call dispatch.
//!
//! The remote model issues structured commands ("tool calls") inside the
//! live session. Each recognized command name is mapped to a registered
//! handler; every invocation produces exactly one result payload that the
//! session sends back upstream. A failing or unknown tool never takes the
//! session down; the failure is reported inside the result payload.

use crate::ride::{RideControls, Vehicle};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// The ride-control command the assistant is declared with.
pub const CONTROL_RIDE: &str = "controlRide";

/// A structured command received from the remote session.
///
/// Created on receipt and consumed exactly once by
/// [`ToolCallDispatcher::dispatch`].
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Correlation id assigned by the remote, echoed back in the result.
    pub id: Option<String>,
    pub name: String,
    pub args: Map<String, Value>,
}

/// The acknowledgement payload for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub id: Option<String>,
    pub name: String,
    pub payload: Value,
}

type Handler = Box<dyn Fn(&Map<String, Value>) -> Result<Value, String> + Send + Sync>;

/// Maps command names to host-supplied handlers.
#[derive(Default)]
pub struct ToolCallDispatcher {
    handlers: HashMap<String, Handler>,
}

impl ToolCallDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `name`, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    /// Invokes the handler registered for the invocation's name.
    ///
    /// Unknown names and handler errors are reported in the result payload,
    /// never propagated: a failed tool call must not terminate the session.
    pub fn dispatch(&self, invocation: &ToolInvocation) -> ToolResult {
        let payload = match self.handlers.get(&invocation.name) {
            Some(handler) => match handler(&invocation.args) {
                Ok(payload) => {
                    info!(tool = %invocation.name, "tool call handled");
                    payload
                }
                Err(message) => {
                    warn!(tool = %invocation.name, error = %message, "tool handler failed");
                    json!({ "error": message })
                }
            },
            None => {
                warn!(tool = %invocation.name, "unsupported tool call");
                json!({ "error": "unsupported" })
            }
        };
        ToolResult {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            payload,
        }
    }
}

/// Registers the `controlRide` handler against the given host controls.
///
/// The command accepts optional `pickup`, `destination` and `vehicle`
/// fields. Whichever fields are present are applied to the host; `vehicle`
/// must match the fixed enumeration case-sensitively and is silently
/// ignored otherwise. On completion the host's booking view is brought
/// forward.
pub fn register_control_ride(
    dispatcher: &mut ToolCallDispatcher,
    controls: Arc<Mutex<dyn RideControls>>,
) {
    dispatcher.register(CONTROL_RIDE, move |args| {
        let mut controls = controls
            .lock()
            .map_err(|_| "host ride state unavailable".to_string())?;
        if let Some(pickup) = args.get("pickup").and_then(Value::as_str) {
            controls.set_pickup(pickup);
        }
        if let Some(destination) = args.get("destination").and_then(Value::as_str) {
            controls.set_destination(destination);
        }
        if let Some(name) = args.get("vehicle").and_then(Value::as_str) {
            match Vehicle::from_wire(name) {
                Some(vehicle) => controls.set_vehicle(vehicle),
                None => debug!(vehicle = %name, "ignoring unknown vehicle class"),
            }
        }
        controls.show_booking();
        Ok(json!({ "ok": true }))
    });
}

/// The function declaration registered with the remote session at setup.
///
/// The descriptions are what the model reads when deciding whether to
/// invoke the command; nothing here is validated locally beyond the
/// vehicle enumeration check in the handler.
pub fn control_ride_declaration() -> Value {
    json!({
        "name": CONTROL_RIDE,
        "description": "Update the ride being booked. Call this whenever the \
                        rider states or changes a pickup point, a destination, \
                        or a vehicle preference.",
        "parameters": {
            "type": "OBJECT",
            "properties": {
                "pickup": {
                    "type": "STRING",
                    "description": "Pickup location as spoken by the rider."
                },
                "destination": {
                    "type": "STRING",
                    "description": "Destination as spoken by the rider."
                },
                "vehicle": {
                    "type": "STRING",
                    "description": "Vehicle class: BIKE, AUTO or CAR."
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ride::{MockRideControls, RideDraft};

    fn invocation(name: &str, args: Value) -> ToolInvocation {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ToolInvocation {
            id: Some("call-1".to_string()),
            name: name.to_string(),
            args,
        }
    }

    #[test]
    fn unknown_tool_reports_unsupported() {
        let dispatcher = ToolCallDispatcher::new();
        let result = dispatcher.dispatch(&invocation("simulateDriver", json!({})));
        assert_eq!(result.payload, json!({ "error": "unsupported" }));
        assert_eq!(result.name, "simulateDriver");
        assert_eq!(result.id.as_deref(), Some("call-1"));
    }

    #[test]
    fn handler_error_is_contained_in_payload() {
        let mut dispatcher = ToolCallDispatcher::new();
        dispatcher.register("broken", |_| Err("boom".to_string()));
        let result = dispatcher.dispatch(&invocation("broken", json!({})));
        assert_eq!(result.payload, json!({ "error": "boom" }));
    }

    #[test]
    fn control_ride_applies_all_fields() {
        let draft = Arc::new(Mutex::new(RideDraft::default()));
        let mut dispatcher = ToolCallDispatcher::new();
        register_control_ride(&mut dispatcher, draft.clone());

        let result = dispatcher.dispatch(&invocation(
            CONTROL_RIDE,
            json!({ "pickup": "MG Road", "destination": "Airport", "vehicle": "CAR" }),
        ));

        assert_eq!(result.payload, json!({ "ok": true }));
        let draft = draft.lock().unwrap();
        assert_eq!(draft.pickup.as_deref(), Some("MG Road"));
        assert_eq!(draft.destination.as_deref(), Some("Airport"));
        assert_eq!(draft.vehicle, Some(Vehicle::Car));
    }

    #[test]
    fn control_ride_ignores_invalid_vehicle_but_applies_the_rest() {
        let mut mock = MockRideControls::new();
        mock.expect_set_pickup()
            .withf(|pickup| pickup == "MG Road")
            .times(1)
            .return_const(());
        mock.expect_set_vehicle().never();
        mock.expect_set_destination().never();
        mock.expect_show_booking().times(1).return_const(());

        let controls: Arc<Mutex<dyn RideControls>> = Arc::new(Mutex::new(mock));
        let mut dispatcher = ToolCallDispatcher::new();
        register_control_ride(&mut dispatcher, controls);

        let result = dispatcher.dispatch(&invocation(
            CONTROL_RIDE,
            json!({ "pickup": "MG Road", "vehicle": "TRUCK" }),
        ));
        assert_eq!(result.payload, json!({ "ok": true }));
    }

    #[test]
    fn control_ride_with_no_fields_still_succeeds() {
        let draft = Arc::new(Mutex::new(RideDraft::default()));
        let mut dispatcher = ToolCallDispatcher::new();
        register_control_ride(&mut dispatcher, draft.clone());

        let result = dispatcher.dispatch(&invocation(CONTROL_RIDE, json!({})));
        assert_eq!(result.payload, json!({ "ok": true }));
        assert_eq!(*draft.lock().unwrap(), RideDraft::default());
    }

    #[test]
    fn declaration_names_every_parameter() {
        let declaration = control_ride_declaration();
        assert_eq!(declaration["name"], CONTROL_RIDE);
        let properties = &declaration["parameters"]["properties"];
        for field in ["pickup", "destination", "vehicle"] {
            assert!(properties.get(field).is_some(), "missing {field}");
        }
    }
}
