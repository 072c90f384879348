use pose_streamer::stream::tcp::read_frame;
use pose_streamer::{
    FrameStreamer, JoystickFrame, JoysticksFrame, Message, Quat, StreamerConfig, TcpTransport, Vec3,
};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // =========================================================
    // Receiver: a local listener that prints what arrives.
    // Pass a host (e.g. `10.0.0.2:8181`) to stream elsewhere.
    // =========================================================
    let host = match std::env::args().nth(1) {
        Some(host) => host,
        None => {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            std::thread::spawn(move || {
                let (mut stream, _) = listener.accept().unwrap();
                while let Ok(message) = read_frame(&mut stream) {
                    if let Message::Text(text) = message {
                        let frame: JoysticksFrame = serde_json::from_str(&text).unwrap();
                        for joystick in frame.joysticks {
                            println!(
                                "  {:<6} pos=({:>6.2}, {:>6.2}, {:>6.2}) key={}",
                                joystick.name,
                                joystick.position.x,
                                joystick.position.y,
                                joystick.position.z,
                                joystick.key_frame
                            );
                        }
                    }
                }
            });
            addr.to_string()
        }
    };

    // =========================================================
    // Sender: 90Hz sampling, gated down to 30 frames per second.
    // Every 45th sample is a keyframe and always goes through.
    // =========================================================
    let config = StreamerConfig::new()
        .set_host(host)
        .set_initial_retry_delay(Duration::ZERO)
        .set_retry_interval(Duration::from_secs(1))
        .set_send_frame_rate(30.0)
        .set_only_send_latest(true);

    let mut streamer: FrameStreamer<JoysticksFrame, String> =
        FrameStreamer::json(config, Arc::new(TcpTransport::new())).unwrap();
    streamer.set_status_sink(Box::new(|status| println!("[status] {status}")));

    let start = Instant::now();
    let mut sample = 0u64;
    while start.elapsed() < Duration::from_secs(3) {
        let t = start.elapsed().as_secs_f32();
        let frame = JoysticksFrame::new(vec![
            JoystickFrame {
                name: "left".to_string(),
                position: Vec3::new(t.sin(), 1.2, t.cos()),
                rotation: Quat::IDENTITY,
                key_frame: sample % 45 == 0,
            },
            JoystickFrame {
                name: "right".to_string(),
                position: Vec3::new(-t.sin(), 1.2, t.cos()),
                rotation: Quat::IDENTITY,
                key_frame: false,
            },
        ]);

        streamer.send(frame);
        streamer.tick_now();
        sample += 1;
        std::thread::sleep(Duration::from_millis(11));
    }

    let stats = streamer.stats();
    println!();
    println!("  State         : {:?}", stats.state);
    println!("  Accepted      : {}", stats.accepted);
    println!("  Rate limited  : {}", stats.rate_limited);
    println!("  Sent          : {}", stats.queue.sent);
    println!("  Dropped stale : {}", stats.queue.dropped_frames);
    println!("  Send failures : {}", stats.queue.send_failures);

    streamer.shutdown();
}
