//! Threads de rede: aceitam conexões TCP, leem frames e respondem ACK.
//!
//! Uma thread por cliente; eventos seguem para a thread principal via channel.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use uplink_core::config::CollectorConfig;
use uplink_core::protocol::{self, ACK_TOKEN, DISCONNECT_MESSAGE, NAK_TOKEN};
use uplink_core::types::Reading;

/// Evento enviado das threads de rede para a thread principal.
#[derive(Debug, Clone)]
pub enum CollectorEvent {
    Connected {
        peer: SocketAddr,
    },
    Reading {
        peer: SocketAddr,
        reading: Reading,
        raw_size: usize,
    },
    /// Payload que não decodifica; respondido com NAK.
    Rejected {
        peer: SocketAddr,
        reason: String,
    },
    Disconnected {
        peer: SocketAddr,
        reason: String,
    },
}

/// Faz bind e inicia a thread de accept. Retorna o endereço efetivo e o
/// receiver do channel.
pub fn spawn_listener(config: &CollectorConfig) -> io::Result<(SocketAddr, Receiver<CollectorEvent>)> {
    let listener = TcpListener::bind(config.bind_addr())?;
    let local = listener.local_addr()?;
    let header_width = config.header_width;
    let (tx, rx) = bounded::<CollectorEvent>(64); // Buffer de 64 eventos

    std::thread::Builder::new()
        .name("tcp-listener".into())
        .spawn(move || accept_loop(listener, header_width, tx))?;

    info!("Coletor escutando em {local}");
    Ok((local, rx))
}

fn accept_loop(listener: TcpListener, header_width: usize, tx: Sender<CollectorEvent>) {
    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                let peer = match stream.peer_addr() {
                    Ok(peer) => peer,
                    Err(e) => {
                        debug!("Conexão sem endereço de peer: {e}");
                        continue;
                    }
                };
                let tx = tx.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("client-{peer}"))
                    .spawn(move || handle_client(stream, peer, header_width, &tx));
                if let Err(e) = spawned {
                    error!("Falha ao criar thread para {peer}: {e}");
                }
            }
            Err(e) => warn!("Erro ao aceitar conexão: {e}"),
        }
    }
}

fn handle_client(mut stream: TcpStream, peer: SocketAddr, header_width: usize, tx: &Sender<CollectorEvent>) {
    let _ = tx.send(CollectorEvent::Connected { peer });

    let reason = loop {
        let payload = match protocol::read_frame(&mut stream, header_width) {
            Ok(Some(payload)) => payload,
            Ok(None) => break "conexão fechada pelo cliente".to_string(),
            Err(e) => break e.to_string(),
        };

        if payload == DISCONNECT_MESSAGE.as_bytes() {
            let _ = stream.write_all(ACK_TOKEN);
            break DISCONNECT_MESSAGE.to_string();
        }

        let (reply, event) = match protocol::decode_reading(&payload) {
            Ok(reading) => (
                ACK_TOKEN,
                CollectorEvent::Reading {
                    peer,
                    reading,
                    raw_size: payload.len(),
                },
            ),
            Err(e) => (
                NAK_TOKEN,
                CollectorEvent::Rejected {
                    peer,
                    reason: e.to_string(),
                },
            ),
        };

        if let Err(e) = stream.write_all(reply) {
            break format!("falha ao responder: {e}");
        }
        if tx.send(event).is_err() {
            debug!("Channel fechado, encerrando cliente {peer}");
            return;
        }
    };

    let _ = tx.send(CollectorEvent::Disconnected { peer, reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::time::Duration;
    use uplink_core::protocol::{disconnect_frame, frame, frame_reading};

    fn start() -> (SocketAddr, Receiver<CollectorEvent>) {
        let config = CollectorConfig {
            bind_ip: "127.0.0.1".into(),
            port: 0,
            ..CollectorConfig::default()
        };
        spawn_listener(&config).unwrap()
    }

    fn next(rx: &Receiver<CollectorEvent>) -> CollectorEvent {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    fn reply(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn acknowledges_valid_reading() {
        let (addr, rx) = start();
        let mut client = TcpStream::connect(addr).unwrap();
        assert!(matches!(next(&rx), CollectorEvent::Connected { .. }));

        let reading = Reading::new(22.5, 1012.3, 110.0);
        client
            .write_all(&frame_reading(&reading, 64).unwrap().to_bytes())
            .unwrap();
        assert_eq!(reply(&mut client), b"ACK");

        match next(&rx) {
            CollectorEvent::Reading {
                reading: got,
                raw_size,
                ..
            } => {
                assert_eq!(got, reading);
                assert_eq!(raw_size, 55);
            }
            other => panic!("esperado leitura, got {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage_payload_with_nak() {
        let (addr, rx) = start();
        let mut client = TcpStream::connect(addr).unwrap();
        next(&rx);

        client
            .write_all(&frame(b"not json".to_vec(), 64).unwrap().to_bytes())
            .unwrap();
        assert_eq!(reply(&mut client), b"NAK");
        assert!(matches!(next(&rx), CollectorEvent::Rejected { .. }));
    }

    #[test]
    fn header_split_across_writes_is_reassembled() {
        let (addr, rx) = start();
        let mut client = TcpStream::connect(addr).unwrap();
        next(&rx);

        let wire = frame_reading(&Reading::new(1.0, 1000.0, 2.0), 64)
            .unwrap()
            .to_bytes();
        client.write_all(&wire[..30]).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        client.write_all(&wire[30..]).unwrap();

        assert_eq!(reply(&mut client), b"ACK");
        assert!(matches!(next(&rx), CollectorEvent::Reading { .. }));
    }

    #[test]
    fn disconnect_message_ends_session() {
        let (addr, rx) = start();
        let mut client = TcpStream::connect(addr).unwrap();
        next(&rx);

        client
            .write_all(&disconnect_frame(64).unwrap().to_bytes())
            .unwrap();
        match next(&rx) {
            CollectorEvent::Disconnected { reason, .. } => assert_eq!(reason, DISCONNECT_MESSAGE),
            other => panic!("esperado desconexão, got {other:?}"),
        }
    }

    #[test]
    fn huge_announced_length_does_not_take_down_collector() {
        let (addr, rx) = start();
        let mut client = TcpStream::connect(addr).unwrap();
        next(&rx);

        let mut wire = format!("{:<64}", 1u64 << 40).into_bytes();
        wire.extend_from_slice(b"{}");
        client.write_all(&wire).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();

        match next(&rx) {
            CollectorEvent::Disconnected { reason, .. } => assert!(reason.contains("truncado"), "{reason}"),
            other => panic!("esperado desconexão, got {other:?}"),
        }

        // o listener continua aceitando clientes
        let _second = TcpStream::connect(addr).unwrap();
        assert!(matches!(next(&rx), CollectorEvent::Connected { .. }));
    }

    #[test]
    fn client_close_is_reported() {
        let (addr, rx) = start();
        let client = TcpStream::connect(addr).unwrap();
        next(&rx);
        drop(client);

        assert!(matches!(next(&rx), CollectorEvent::Disconnected { .. }));
    }
}
