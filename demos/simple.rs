use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{net::TcpListener, task, time::sleep};
use topicrpc::{call, Broker, Bus, Config, PeerConnection, TcpTransport};

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Message {
    x: i32,
    y: i32,
    z: i32,
    info: String,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {} {}]", self.x, self.y, self.z, self.info)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let broker = Arc::new(Broker::new());
    task::spawn(broker.clone().serve(listener));

    let transport = TcpTransport::connect("TestID", "127.0.0.1", port).await?;
    let bus = Bus::new(Arc::new(transport), &Config::default())?;

    // "A/B" on one side, "B/A" on the other.
    let peer_one = PeerConnection::init(&bus, "A", "B")?;
    let peer_two = PeerConnection::init(&bus, "B", "A")?;
    // Masquerades as peer_two and receives the same calls.
    let peer_three = PeerConnection::init(&bus, "B", "A")?;

    let reply = peer_two.caller();
    peer_two.bind("Test", move |f: f32, s: String, received: Message| {
        println!("Arg 1 {f}");
        println!("Arg 2 {s}");
        println!("Arg 3 {received}");
        if let Err(err) = reply.call("Test_ret", ("Done",)) {
            eprintln!("reply failed: {err}");
        }
    });

    peer_two.bind("update", |message: String| {
        println!("message to two : {message}");
    });
    peer_three.bind("update", |message: String| {
        println!("message to three : {message}");
    });

    let shut_down = Arc::new(AtomicBool::new(false));
    let flag = shut_down.clone();
    peer_one.bind("Test_ret", move |x: String| {
        println!("Test_ret: {x}");
        flag.store(true, Ordering::Release);
    });

    while broker.subscriptions() < 3 {
        bus.drain_once()?;
        sleep(Duration::from_millis(1)).await;
    }

    peer_one.call("update", (" Hello ! ",))?;

    let bottle = Message {
        x: 1,
        y: 2,
        z: 3,
        info: "This is a test Message".into(),
    };
    call!(peer_one, "Test", 0.4f32, "string arg", bottle)?;

    while !shut_down.load(Ordering::Acquire) {
        bus.drain_once()?;
        sleep(Duration::from_millis(1)).await;
    }
    Ok(())
}
