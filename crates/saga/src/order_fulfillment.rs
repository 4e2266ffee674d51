//! Order fulfillment saga constants.

/// The saga type identifier for order fulfillment.
pub const SAGA_TYPE: &str = "OrderFulfillment";

/// Step name: price the items and persist the order.
pub const STEP_CREATE_ORDER: &str = "create_order";

/// Step name: hold stock for every line.
pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";

/// Step name: create the payment and forward it to the provider.
pub const STEP_INITIATE_PAYMENT: &str = "initiate_payment";

/// Step name: confirm or release stock and settle the order.
pub const STEP_APPLY_OUTCOME: &str = "apply_payment_outcome";

/// Step name: undo a reservation after a failed initiation.
pub const STEP_COMPENSATE: &str = "compensate";

pub(crate) fn record_step(step: &'static str, started: std::time::Instant) {
    metrics::histogram!("saga_step_duration_seconds", "step" => step)
        .record(started.elapsed().as_secs_f64());
}
