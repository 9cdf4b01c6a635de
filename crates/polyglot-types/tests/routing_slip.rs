//! Routing slip loop guard

use polyglot_types::{KernelUri, ModelError, RoutingSlip};

#[test]
fn test_stamping_distinct_endpoints_preserves_order() {
    let uris: Vec<KernelUri> = (0..16)
        .map(|i| KernelUri::local("host", &format!("kernel{}", i)))
        .collect();

    let mut slip = RoutingSlip::new();
    for uri in &uris {
        slip.stamp(uri).expect("distinct endpoints always stamp");
    }

    assert_eq!(slip.to_array(), uris);
    assert!(uris.iter().all(|uri| slip.contains(uri)));
}

#[test]
fn test_stamping_same_endpoint_twice_fails() {
    let mut slip = RoutingSlip::new();
    let a = KernelUri::local("host", "a");
    let b = KernelUri::local("host", "b");
    slip.stamp(&a).unwrap();
    slip.stamp(&b).unwrap();

    let err = slip.stamp(&a).unwrap_err();
    assert!(
        matches!(err, ModelError::RoutingLoopDetected { ref uri, .. } if uri == "kernel://host/a"),
        "unexpected error: {err}"
    );
    // the failed stamp leaves the slip untouched
    assert_eq!(slip.to_array(), vec![a, b]);
}

#[test]
fn test_query_strings_do_not_hide_loops() {
    let mut slip = RoutingSlip::new();
    slip.stamp(&KernelUri::parse("kernel://host/a?tag=arrived").unwrap())
        .unwrap();
    assert!(slip.stamp(&KernelUri::local("host", "a")).is_err());
}

#[test]
fn test_proxy_round_trip_is_detected() {
    // A forwards to B, B forwards back to A
    let a = KernelUri::local("a", "csharp");
    let b = KernelUri::local("b", "csharp");

    let mut slip = RoutingSlip::new();
    slip.stamp(&a).unwrap();
    slip.stamp(&b).unwrap();
    assert!(slip.contains(&a));
    assert!(slip.stamp(&a).is_err());
}
