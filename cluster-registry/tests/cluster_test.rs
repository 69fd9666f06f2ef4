// Tests for registries spread over several nodes
//
// These tests run two or three registries on one in-memory cluster and verify that
// routes propagate, calls cross node boundaries, replicas share the load and that
// node loss and isolation are reported the way callers expect.

use cluster_registry::{NodeRef, RegistryError, RouteEvent, RoutePath};
use cluster_test_utils::fixtures::{
    calculator_interface, Calculator, CalculatorClient, RecordingListener, SimpleCalculator,
};
use cluster_test_utils::{create_test_cluster, eventually, init_test_logging, start_test_node, TestNode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

const ADD_PATH: &str = "calc@com.example.Calculator::add(int,int)";
const HANG_PATH: &str = "calc@com.example.Calculator::hang()";

fn node_ref(node_id: &str) -> NodeRef {
    NodeRef::new(node_id, "registry")
}

/// Wait until `node` knows exactly `expected` as the routes of `path`
async fn wait_for_routes(node: &TestNode, path: &str, expected: Vec<NodeRef>) -> bool {
    eventually(Duration::from_secs(2), || {
        let registry = node.registry.clone();
        let expected = expected.clone();
        async move { registry.routes_for_path(path).await.ok() == Some(expected) }
    })
    .await
}

/// Test remote invocation between two nodes
///
/// INTENTION: A route registered on one node becomes known to its peer, which can then
/// call it through a proxy and gets the result computed on the registering node.
#[tokio::test]
async fn test_remote_invocation() {
    init_test_logging();
    match timeout(Duration::from_secs(10), async {
        let cluster = create_test_cluster();
        let node_a = start_test_node(&cluster, "node-a").await.unwrap();
        let node_b = start_test_node(&cluster, "node-b").await.unwrap();
        let interface = calculator_interface();
        let calculator = Arc::new(SimpleCalculator::new("b"));

        node_b
            .registry
            .register("calc", &interface, calculator.clone() as Arc<dyn Calculator>)
            .await
            .unwrap();
        assert!(wait_for_routes(&node_a, ADD_PATH, vec![node_ref("node-b")]).await);

        let client = CalculatorClient::new(node_a.registry.async_client("calc", &interface).unwrap());
        assert_eq!(client.add(2, 3).await.unwrap(), 5);
        assert_eq!(calculator.calls(), 1);

        let response = client
            .proxy()
            .call("add", vec![serde_json::json!(40), serde_json::json!(2)])
            .unwrap()
            .await
            .unwrap();
        assert_eq!(response.decode::<i32>().unwrap(), 42);
        assert_eq!(response.node, Some(node_ref("node-b")));

        let error = client.divide(1, 0).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<RegistryError>(),
            Some(RegistryError::RemoteInvocationFailure { .. })
        ));
    })
    .await
    {
        Ok(_) => (),
        Err(_) => panic!("Test timed out after 10 seconds"),
    }
}

/// INTENTION: Two nodes registering the same path at the same time both end up as routes
/// on both nodes; each node sees the path announced once.
#[tokio::test]
async fn test_concurrent_registration_converges() {
    match timeout(Duration::from_secs(10), async {
        let cluster = create_test_cluster();
        let node_a = start_test_node(&cluster, "node-a").await.unwrap();
        let node_b = start_test_node(&cluster, "node-b").await.unwrap();
        let interface = calculator_interface();
        let listener_a = Arc::new(RecordingListener::new());
        node_a.registry.add_route_listener(listener_a.clone());

        let (registered_a, registered_b) = tokio::join!(
            node_a.registry.register(
                "calc",
                &interface,
                Arc::new(SimpleCalculator::new("a")) as Arc<dyn Calculator>
            ),
            node_b.registry.register(
                "calc",
                &interface,
                Arc::new(SimpleCalculator::new("b")) as Arc<dyn Calculator>
            ),
        );
        registered_a.unwrap();
        registered_b.unwrap();

        let both = vec![node_ref("node-a"), node_ref("node-b")];
        assert!(wait_for_routes(&node_a, ADD_PATH, both.clone()).await);
        assert!(wait_for_routes(&node_b, ADD_PATH, both).await);

        assert!(listener_a.wait_for(3, Duration::from_secs(2)).await);
        let add = RoutePath::new(ADD_PATH);
        assert_eq!(
            listener_a.events_for(&add),
            vec![RouteEvent::Announced(add.clone())]
        );
    })
    .await
    {
        Ok(_) => (),
        Err(_) => panic!("Test timed out after 10 seconds"),
    }
}

/// INTENTION: With a route on every node, consecutive calls rotate over the replicas so
/// each one serves its share.
#[tokio::test]
async fn test_calls_rotate_over_replicas() {
    match timeout(Duration::from_secs(10), async {
        let cluster = create_test_cluster();
        let node_a = start_test_node(&cluster, "node-a").await.unwrap();
        let node_b = start_test_node(&cluster, "node-b").await.unwrap();
        let node_c = start_test_node(&cluster, "node-c").await.unwrap();
        let interface = calculator_interface();

        let calculators: Vec<Arc<SimpleCalculator>> = ["a", "b", "c"]
            .iter()
            .map(|name| Arc::new(SimpleCalculator::new(name)))
            .collect();
        for (node, calculator) in [&node_a, &node_b, &node_c].iter().zip(&calculators) {
            node.registry
                .register("calc", &interface, calculator.clone() as Arc<dyn Calculator>)
                .await
                .unwrap();
        }
        let all = vec![node_ref("node-a"), node_ref("node-b"), node_ref("node-c")];
        assert!(wait_for_routes(&node_a, ADD_PATH, all).await);

        let client = CalculatorClient::new(node_a.registry.async_client("calc", &interface).unwrap());
        for n in 0..6 {
            assert_eq!(client.add(n, 1).await.unwrap(), n + 1);
        }
        for calculator in &calculators {
            assert_eq!(calculator.calls(), 2, "calculator {}", calculator.name());
        }
    })
    .await
    {
        Ok(_) => (),
        Err(_) => panic!("Test timed out after 10 seconds"),
    }
}

/// INTENTION: A peer that joins after a registration still learns the route, since
/// registrars introduce their local routes to every new member.
#[tokio::test]
async fn test_late_joiner_learns_existing_routes() {
    let cluster = create_test_cluster();
    let node_a = start_test_node(&cluster, "node-a").await.unwrap();
    node_a
        .registry
        .register(
            "calc",
            &calculator_interface(),
            Arc::new(SimpleCalculator::new("a")) as Arc<dyn Calculator>,
        )
        .await
        .unwrap();

    let node_b = start_test_node(&cluster, "node-b").await.unwrap();
    assert!(wait_for_routes(&node_b, ADD_PATH, vec![node_ref("node-a")]).await);
    assert!(wait_for_routes(&node_b, HANG_PATH, vec![node_ref("node-a")]).await);
}

/// Test node loss while a call is in flight
///
/// INTENTION: When the only node serving a path leaves, the pending call fails with
/// `RouteNotFound` long before its timeout, the route disappears and listeners are told.
#[tokio::test]
async fn test_node_down_fails_in_flight_calls() {
    match timeout(Duration::from_secs(10), async {
        let cluster = create_test_cluster();
        let node_a = start_test_node(&cluster, "node-a").await.unwrap();
        let node_b = start_test_node(&cluster, "node-b").await.unwrap();
        let listener = Arc::new(RecordingListener::new());
        node_a.registry.add_route_listener(listener.clone());

        node_b
            .registry
            .register(
                "calc",
                &calculator_interface(),
                Arc::new(SimpleCalculator::new("b")) as Arc<dyn Calculator>,
            )
            .await
            .unwrap();
        assert!(wait_for_routes(&node_a, HANG_PATH, vec![node_ref("node-b")]).await);

        let started = Instant::now();
        let pending = node_a
            .registry
            .route(HANG_PATH, Duration::from_secs(5))
            .call(vec![])
            .unwrap();
        cluster.leave("node-b");

        assert_eq!(
            pending.await,
            Err(RegistryError::RouteNotFound(HANG_PATH.to_string()))
        );
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(wait_for_routes(&node_a, HANG_PATH, vec![]).await);

        // three routes announced, three terminated
        assert!(listener.wait_for(6, Duration::from_secs(2)).await);
        let hang = RoutePath::new(HANG_PATH);
        assert_eq!(
            listener.events_for(&hang),
            vec![
                RouteEvent::Announced(hang.clone()),
                RouteEvent::Terminated(hang.clone(), node_ref("node-b")),
            ]
        );
    })
    .await
    {
        Ok(_) => (),
        Err(_) => panic!("Test timed out after 10 seconds"),
    }
}

/// INTENTION: An unreachable node that is not confirmed down keeps its routes; calls to it
/// fail only when their timeout expires.
#[tokio::test]
async fn test_isolated_node_times_out() {
    match timeout(Duration::from_secs(10), async {
        let cluster = create_test_cluster();
        let node_a = start_test_node(&cluster, "node-a").await.unwrap();
        let node_b = start_test_node(&cluster, "node-b").await.unwrap();
        let interface = calculator_interface();

        node_b
            .registry
            .register("calc", &interface, Arc::new(SimpleCalculator::new("b")) as Arc<dyn Calculator>)
            .await
            .unwrap();
        assert!(wait_for_routes(&node_a, ADD_PATH, vec![node_ref("node-b")]).await);

        cluster.isolate("node-b");
        let client = node_a
            .registry
            .async_client_with_timeout("calc", &interface, Duration::from_millis(300))
            .unwrap();
        let started = Instant::now();
        let result = client.invoke::<i32>("add", vec![serde_json::json!(1), serde_json::json!(2)]).await;

        assert_eq!(
            result,
            Err(RegistryError::InvocationTimeout {
                path: ADD_PATH.to_string(),
                timeout_ms: 300
            })
        );
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(
            node_a.registry.routes_for_path(ADD_PATH).await.unwrap(),
            vec![node_ref("node-b")]
        );
    })
    .await
    {
        Ok(_) => (),
        Err(_) => panic!("Test timed out after 10 seconds"),
    }
}

/// INTENTION: A registry that shuts down withdraws its routes from its peers.
#[tokio::test]
async fn test_shutdown_withdraws_routes_from_peers() {
    match timeout(Duration::from_secs(10), async {
        let cluster = create_test_cluster();
        let node_a = start_test_node(&cluster, "node-a").await.unwrap();
        let node_b = start_test_node(&cluster, "node-b").await.unwrap();
        let listener = Arc::new(RecordingListener::new());
        node_a.registry.add_route_listener(listener.clone());

        node_b
            .registry
            .register(
                "calc",
                &calculator_interface(),
                Arc::new(SimpleCalculator::new("b")) as Arc<dyn Calculator>,
            )
            .await
            .unwrap();
        assert!(wait_for_routes(&node_a, ADD_PATH, vec![node_ref("node-b")]).await);

        node_b.registry.shutdown().await.unwrap();
        assert!(wait_for_routes(&node_a, ADD_PATH, vec![]).await);
        assert!(listener.wait_for(6, Duration::from_secs(2)).await);
        assert!(listener
            .events()
            .iter()
            .any(|e| e == &RouteEvent::Terminated(RoutePath::new(ADD_PATH), node_ref("node-b"))));
    })
    .await
    {
        Ok(_) => (),
        Err(_) => panic!("Test timed out after 10 seconds"),
    }
}
