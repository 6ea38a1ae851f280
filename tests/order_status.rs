use shop_order_api::order_status::{
    Action, Actor, OrderStatus, OrderStatusProcessor, TransitionError,
};
use uuid::Uuid;

fn processor(status: OrderStatus) -> OrderStatusProcessor {
    OrderStatusProcessor::new(Uuid::new_v4(), status)
}

#[test]
fn happy_path_walks_every_forward_edge() {
    let mut p = processor(OrderStatus::WaitForPayment);
    let steps = [
        (Actor::System, OrderStatus::Pending),
        (Actor::Admin, OrderStatus::Approved),
        (Actor::Admin, OrderStatus::Shipping),
        (Actor::Customer, OrderStatus::Received),
    ];

    for (actor, expected) in steps {
        let from = p.status();
        let change = p.advance(actor).expect("legal transition");
        assert_eq!(change.from, from);
        assert_eq!(change.to, expected);
        assert_eq!(change.actor, actor);
        assert_eq!(change.order_id, p.order_id());
        assert_eq!(p.status(), expected);
    }
}

#[test]
fn received_has_no_forward_edge() {
    let mut p = processor(OrderStatus::Received);
    let err = p.advance(Actor::Customer).unwrap_err();
    assert_eq!(
        err,
        TransitionError::IllegalTransition {
            action: Action::Advance,
            actual: OrderStatus::Received,
            required: None,
            target: None,
        }
    );
    assert_eq!(p.status(), OrderStatus::Received);
}

#[test]
fn terminal_statuses_reject_every_action() {
    for status in [OrderStatus::Cancelled, OrderStatus::Rejected, OrderStatus::Completed] {
        assert!(status.is_terminal());
        for actor in [Actor::System, Actor::Admin, Actor::Customer] {
            let mut p = processor(status);
            assert!(p.advance(actor).is_err());
            assert!(p.reject(actor).is_err());
            assert!(p.cancel(actor).is_err());
            assert_eq!(p.status(), status);
        }
    }
}

#[test]
fn wrong_actor_is_refused_without_mutation() {
    let mut p = processor(OrderStatus::WaitForPayment);
    let err = p.advance(Actor::Customer).unwrap_err();
    assert_eq!(
        err,
        TransitionError::ActorNotAllowed {
            actor: Actor::Customer,
            from: OrderStatus::WaitForPayment,
            to: OrderStatus::Pending,
        }
    );
    assert_eq!(p.status(), OrderStatus::WaitForPayment);

    let mut p = processor(OrderStatus::Shipping);
    assert!(matches!(
        p.advance(Actor::Admin),
        Err(TransitionError::ActorNotAllowed { .. })
    ));
    assert_eq!(p.status(), OrderStatus::Shipping);
}

#[test]
fn status_is_checked_before_actor() {
    // Approved has a forward edge, so only the actor is wrong here.
    let mut p = processor(OrderStatus::Approved);
    assert!(matches!(
        p.advance(Actor::Customer),
        Err(TransitionError::ActorNotAllowed { .. })
    ));

    // Admin is the wrong actor for cancel too, but the status mismatch wins.
    let mut p = processor(OrderStatus::Pending);
    let err = p.cancel(Actor::Admin).unwrap_err();
    assert_eq!(
        err,
        TransitionError::IllegalTransition {
            action: Action::Cancel,
            actual: OrderStatus::Pending,
            required: Some(OrderStatus::WaitForPayment),
            target: Some(OrderStatus::Cancelled),
        }
    );
}

#[test]
fn reject_only_from_pending_by_admin() {
    let mut p = processor(OrderStatus::Pending);
    let change = p.reject(Actor::Admin).expect("admin rejects pending");
    assert_eq!(change.to, OrderStatus::Rejected);
    assert_eq!(p.status(), OrderStatus::Rejected);

    let mut p = processor(OrderStatus::Pending);
    assert!(matches!(
        p.reject(Actor::Customer),
        Err(TransitionError::ActorNotAllowed { .. })
    ));

    let mut p = processor(OrderStatus::Approved);
    assert!(matches!(
        p.reject(Actor::Admin),
        Err(TransitionError::IllegalTransition { .. })
    ));
}

#[test]
fn cancel_only_while_waiting_for_payment() {
    let mut p = processor(OrderStatus::WaitForPayment);
    let change = p.cancel(Actor::Customer).expect("customer cancels unpaid order");
    assert_eq!(change.to, OrderStatus::Cancelled);

    // Once paid the order can no longer be cancelled.
    let mut p = processor(OrderStatus::Pending);
    assert!(matches!(
        p.cancel(Actor::Customer),
        Err(TransitionError::IllegalTransition { .. })
    ));
}

#[test]
fn payment_confirmation_applies_once() {
    let mut p = processor(OrderStatus::WaitForPayment);
    p.advance(Actor::System).expect("first confirmation");
    let err = p.advance(Actor::System).unwrap_err();
    assert!(matches!(err, TransitionError::ActorNotAllowed { .. }));
    assert_eq!(p.status(), OrderStatus::Pending);
}

#[test]
fn stored_status_round_trips_and_fails_closed() {
    for status in OrderStatus::ALL {
        let parsed: OrderStatus = status.as_str().parse().expect("known status");
        assert_eq!(parsed, status);
    }

    let err = OrderStatusProcessor::from_stored(Uuid::new_v4(), "Shipped").unwrap_err();
    assert_eq!(err, TransitionError::InvalidStatus("Shipped".into()));
    assert!("pending".parse::<OrderStatus>().is_err());
}

#[test]
fn illegal_transition_message_names_required_status() {
    let mut p = processor(OrderStatus::WaitForPayment);
    let err = p.reject(Actor::Admin).unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot reject an order in status WaitForPayment: status Pending is required before it can become Rejected"
    );
}
