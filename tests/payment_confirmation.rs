use shop_order_api::{
    models::PaymentStatus,
    order_status::OrderStatus,
    services::payment_service::{Confirmation, plan_confirmation},
};

#[test]
fn first_successful_callback_applies() {
    assert_eq!(
        plan_confirmation(PaymentStatus::Pending, OrderStatus::WaitForPayment),
        Confirmation::Apply
    );
}

#[test]
fn paid_payment_is_a_replay_whatever_the_order_status() {
    for order in OrderStatus::ALL {
        assert_eq!(
            plan_confirmation(PaymentStatus::Paid, order),
            Confirmation::Replay,
            "{order}"
        );
    }
}

#[test]
fn pending_payment_on_an_order_that_moved_on_is_orphaned() {
    // Cancelled before the charge landed, or confirmed through another payment.
    for order in OrderStatus::ALL {
        if order == OrderStatus::WaitForPayment {
            continue;
        }
        assert_eq!(
            plan_confirmation(PaymentStatus::Pending, order),
            Confirmation::Orphaned,
            "{order} must be recorded without touching the order"
        );
    }
}
