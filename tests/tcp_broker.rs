use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{net::TcpListener, time::sleep};
use topicrpc::{Broker, Bus, Config, PeerConnection, TcpTransport, TransportError};

async fn start_broker() -> (Arc<Broker>, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let broker = Arc::new(Broker::new());
    tokio::spawn(broker.clone().serve(listener));
    (broker, port)
}

async fn client_bus(client_id: &str, port: u16) -> Arc<Bus> {
    let transport = TcpTransport::connect(client_id, "127.0.0.1", port)
        .await
        .unwrap();
    Bus::new(Arc::new(transport), &Config::default()).unwrap()
}

/// Drains every bus until `done` holds, yielding to the socket tasks in
/// between rounds.
async fn drain_until(buses: &[&Arc<Bus>], done: impl Fn() -> bool) {
    for _ in 0..5_000 {
        for bus in buses {
            bus.drain_once().unwrap();
        }
        if done() {
            return;
        }
        sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out draining");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn greet_and_reply_over_tcp() {
    let (broker, port) = start_broker().await;
    let bus_a = client_bus("client-a", port).await;
    let bus_b = client_bus("client-b", port).await;

    let a = PeerConnection::init(&bus_a, "A", "B").unwrap();
    let b = PeerConnection::init(&bus_b, "B", "A").unwrap();

    let greeted = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = greeted.clone();
    let reply = b.caller();
    b.bind("greet", move |message: String| {
        sink.lock().unwrap().push(message.clone());
        reply.call("greeted", (message.len() as u32,)).unwrap();
    });

    let lengths = Arc::new(Mutex::new(Vec::<u32>::new()));
    let sink = lengths.clone();
    a.bind("greeted", move |len: u32| sink.lock().unwrap().push(len));

    drain_until(&[&bus_a, &bus_b], || broker.subscriptions() == 2).await;

    a.call("greet", ("hello",)).unwrap();
    drain_until(&[&bus_a, &bus_b], || !lengths.lock().unwrap().is_empty()).await;

    assert_eq!(*greeted.lock().unwrap(), vec!["hello".to_string()]);
    assert_eq!(*lengths.lock().unwrap(), vec![5]);
    assert_eq!(broker.clients(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcast_reaches_every_masquerading_peer() {
    let (broker, port) = start_broker().await;
    let bus_one = client_bus("one", port).await;
    let bus_two = client_bus("two", port).await;
    let bus_three = client_bus("three", port).await;

    let one = PeerConnection::init(&bus_one, "A", "B").unwrap();
    let two = PeerConnection::init(&bus_two, "B", "A").unwrap();
    let three = PeerConnection::init(&bus_three, "B", "A").unwrap();
    // A second connection on the same client shares one broker delivery.
    let three_again = PeerConnection::init(&bus_three, "B", "A").unwrap();

    let seen = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    for (peer, label) in [(&two, "two"), (&three, "three"), (&three_again, "three again")] {
        let sink = seen.clone();
        peer.bind("update", move |_: String| sink.lock().unwrap().push(label));
    }

    let buses = [&bus_one, &bus_two, &bus_three];
    drain_until(&buses, || broker.subscriptions() == 4).await;

    one.call("update", (" Hello ! ",)).unwrap();
    drain_until(&buses, || seen.lock().unwrap().len() >= 3).await;
    sleep(Duration::from_millis(20)).await;
    for bus in buses {
        bus.drain_once().unwrap();
    }

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["three", "three again", "two"]);
}

#[tokio::test]
async fn connect_failure_is_reported() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = TcpTransport::connect("lonely", "127.0.0.1", port)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Connect { .. }));
}
