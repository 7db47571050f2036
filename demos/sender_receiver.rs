//! A minimal sender/receiver loop over a simulated lossy channel, showing
//! that dropping up to two frames per parity group is transparent to the
//! consumer.

use rppp::{DecodeBuffer, EncodeBuffer, Status};

#[derive(Copy, Clone, Debug, PartialEq)]
struct SampleNetVar {
    pos: [i32; 3],
    rot: [i32; 3],
    sca: [i32; 3],
    health: i32,
    id: u16,
}

fn main() {
    env_logger::init();

    const N: usize = 4;
    let mut encoder: EncodeBuffer<SampleNetVar, N> = EncodeBuffer::new();
    let mut decoder: DecodeBuffer<SampleNetVar, N> = DecodeBuffer::new();

    let mut sent = Vec::new();
    let mut received = Vec::new();

    for i in 0..20u16 {
        let item = SampleNetVar {
            pos: [i as i32, 0, 0],
            rot: [0, 0, 0],
            sca: [1, 1, 1],
            health: 100,
            id: i,
        };
        sent.push(item);
        encoder.enq(&item);

        loop {
            let (status, frame) = encoder.deq();
            let Some(frame) = frame else { break };
            // Simulate a channel that drops the first data slot of every
            // group, exercising the one-loss recovery path.
            if frame.header.seq_id % (N as u16 + 2) == 0 {
                tracing::info!(seq_id = frame.header.seq_id, "dropped on the wire");
                continue;
            }
            decoder.enq(&frame);
            if status == Status::OkParityGenerated {
                tracing::debug!("group fully emitted");
            }
        }

        loop {
            let (status, item) = decoder.deq();
            match status {
                Status::Ok => received.push(item.expect("Ok implies Some")),
                Status::NoElement => break,
                Status::OkParityGenerated => unreachable!("deq never returns this"),
            }
        }
    }

    assert_eq!(sent, received, "every item must be recovered despite drops");
    println!("recovered {} of {} items", received.len(), sent.len());
}
