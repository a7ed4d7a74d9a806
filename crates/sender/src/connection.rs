//! Connection Manager – dono exclusivo do transporte até o coletor.
//!
//! O handle do transporte nunca sai daqui. O loop de uplink recebe apenas
//! uma [`Session`] emprestada de [`ConnectionManager::ensure_connected`],
//! que só existe enquanto o estado é [`ConnectionState::Connected`].
//!
//! Reconexão: tentativas limitadas com espera fixa entre elas. A falha
//! esperada é uma queda breve de Wi-Fi, não sobrecarga do servidor.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};
use uplink_core::config::{UplinkConfig, WriteMode};
use uplink_core::protocol::Frame;

/// Tamanho máximo da resposta lida por ciclo.
const RESPONSE_BUF_SIZE: usize = 2048;

/// Espera curta por segmentos restantes depois do primeiro byte da resposta.
const DRAIN_WINDOW: Duration = Duration::from_millis(20);

// ──────────────────────────────────────────────
// Traits de transporte
// ──────────────────────────────────────────────

/// Stream bidirecional já conectado.
pub trait Link: Read + Write {
    /// `true` se o peer ainda não fechou a conexão.
    fn is_alive(&self) -> bool;

    /// Alterna entre o prazo de resposta normal e uma janela curta usada
    /// para drenar o restante de uma resposta já iniciada.
    fn set_draining(&mut self, draining: bool) -> io::Result<()>;

    /// Encerra o transporte; erros são ignorados.
    fn shutdown(&mut self);
}

/// Fábrica de conexões.
pub trait Connector {
    type Link: Link;

    /// Uma única tentativa de conexão.
    fn connect(&mut self) -> io::Result<Self::Link>;

    /// Destino legível para logs.
    fn endpoint(&self) -> String;
}

// ──────────────────────────────────────────────
// TCP
// ──────────────────────────────────────────────

/// Conector TCP com timeout de conexão e prazo de resposta.
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl TcpConnector {
    pub fn new(
        addr: impl Into<String>,
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            response_timeout,
        }
    }

    pub fn from_config(config: &UplinkConfig) -> Self {
        Self::new(
            config.collector_addr(),
            config.connect_timeout(),
            config.response_timeout(),
        )
    }

    fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = self.addr.to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("nenhum endereço para {}", self.addr),
            ));
        }
        Ok(addrs)
    }
}

impl Connector for TcpConnector {
    type Link = TcpLink;

    fn connect(&mut self) -> io::Result<TcpLink> {
        let mut last_err = None;
        for addr in self.resolve()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.response_timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(TcpLink {
                        stream,
                        response_timeout: self.response_timeout,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotConnected)))
    }

    fn endpoint(&self) -> String {
        self.addr.clone()
    }
}

/// Conexão TCP viva.
pub struct TcpLink {
    stream: TcpStream,
    response_timeout: Duration,
}

impl Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Link for TcpLink {
    fn is_alive(&self) -> bool {
        // peek não bloqueante: 0 bytes = FIN recebido
        if self.stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut peek_buf = [0u8; 1];
        let alive = match self.stream.peek(&mut peek_buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
        };
        self.stream.set_nonblocking(false).is_ok() && alive
    }

    fn set_draining(&mut self, draining: bool) -> io::Result<()> {
        let timeout = if draining {
            DRAIN_WINDOW
        } else {
            self.response_timeout
        };
        self.stream.set_read_timeout(Some(timeout))
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

// ──────────────────────────────────────────────
// Estado e erros
// ──────────────────────────────────────────────

/// Estado da conexão com o coletor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Orçamento de tentativas esgotado neste ciclo.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Conexão com {endpoint} esgotada após {attempts} tentativas")]
pub struct ConnectionExhausted {
    pub attempts: u32,
    pub endpoint: String,
}

/// Falha ao obter a resposta do coletor.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("Resposta inesperada: {0:?}")]
    Unexpected(String),

    #[error("Conexão fechada pelo coletor antes da resposta")]
    Closed,

    #[error("Sem resposta dentro do prazo")]
    Timeout,

    #[error("Erro de leitura: {0}")]
    Io(#[source] io::Error),
}

/// Política de reconexão: `max_retries` tentativas extras, espera fixa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &UplinkConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay(),
        }
    }
}

/// Como o frame é escrito no transporte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmit {
    /// Header + payload em uma única escrita.
    Atomic,
    /// Header, pausa, payload (compatibilidade com receptores legados).
    Split { pause: Duration },
}

impl Transmit {
    pub fn from_config(config: &UplinkConfig) -> Self {
        match config.write_mode {
            WriteMode::Atomic => Transmit::Atomic,
            WriteMode::Split => Transmit::Split {
                pause: config.inter_write_pause(),
            },
        }
    }
}

// ──────────────────────────────────────────────
// Connection Manager
// ──────────────────────────────────────────────

/// Gerenciador de conexão com retry limitado.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    link: Option<C::Link>,
    state: ConnectionState,
    policy: RetryPolicy,
    total_attempts: u64,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, policy: RetryPolicy) -> Self {
        Self {
            connector,
            link: None,
            state: ConnectionState::Disconnected,
            policy,
            total_attempts: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Total de tentativas de conexão desde a criação.
    pub fn total_attempts(&self) -> u64 {
        self.total_attempts
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// Garante uma conexão viva e devolve a sessão para a troca do ciclo.
    ///
    /// Caminho rápido: já conectado e transporte vivo, nenhuma tentativa.
    /// Caso contrário descarta o handle antigo e faz até
    /// `max_retries + 1` tentativas com espera fixa entre elas.
    pub fn ensure_connected(&mut self) -> Result<Session<'_, C::Link>, ConnectionExhausted> {
        if self.state == ConnectionState::Connected
            && self.link.as_ref().is_some_and(|link| link.is_alive())
        {
            return Ok(Session {
                link: &mut self.link,
                state: &mut self.state,
            });
        }

        self.release();

        let max = self.policy.max_retries;
        let mut retries: u32 = 0;
        loop {
            self.state = ConnectionState::Connecting;
            self.total_attempts += 1;

            match self.connector.connect() {
                Ok(link) => {
                    info!("Conectado a {} (tentativa {})", self.connector.endpoint(), retries + 1);
                    self.link = Some(link);
                    self.state = ConnectionState::Connected;
                    return Ok(Session {
                        link: &mut self.link,
                        state: &mut self.state,
                    });
                }
                Err(e) => {
                    self.state = ConnectionState::Disconnected;
                    warn!(
                        "Falha ao conectar em {} (tentativa {}/{}): {e}",
                        self.connector.endpoint(),
                        retries + 1,
                        max + 1
                    );
                    if retries >= max {
                        return Err(ConnectionExhausted {
                            attempts: retries + 1,
                            endpoint: self.connector.endpoint(),
                        });
                    }
                    retries += 1;
                    if !self.policy.delay.is_zero() {
                        std::thread::sleep(self.policy.delay);
                    }
                }
            }
        }
    }

    /// Encerra a conexão, enviando `farewell` antes se o transporte estiver vivo.
    pub fn close(&mut self, farewell: Option<&Frame>) {
        if let Some(mut link) = self.link.take() {
            if let Some(frame) = farewell.filter(|_| link.is_alive()) {
                if let Err(e) = link.write_all(&frame.to_bytes()).and_then(|_| link.flush()) {
                    debug!("Falha ao enviar mensagem de desconexão: {e}");
                }
            }
            link.shutdown();
            info!("Conexão com {} encerrada", self.connector.endpoint());
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Descarta um handle antigo sem cerimônia.
    fn release(&mut self) {
        if let Some(mut stale) = self.link.take() {
            debug!("Descartando conexão antiga com {}", self.connector.endpoint());
            stale.shutdown();
        }
        self.state = ConnectionState::Disconnected;
    }
}

// ──────────────────────────────────────────────
// Sessão
// ──────────────────────────────────────────────

/// Acesso emprestado à conexão viva durante um ciclo.
///
/// Qualquer erro de I/O descarta o transporte e volta o estado para
/// `Disconnected`; o próximo ciclo reconecta.
pub struct Session<'a, L: Link> {
    link: &'a mut Option<L>,
    state: &'a mut ConnectionState,
}

impl<L: Link> Session<'_, L> {
    /// Escreve o frame completo.
    pub fn send(&mut self, frame: &Frame, transmit: Transmit) -> io::Result<()> {
        let result = match self.link.as_mut() {
            Some(link) if *self.state == ConnectionState::Connected => write_frame(link, frame, transmit),
            _ => Err(io::Error::from(io::ErrorKind::NotConnected)),
        };
        if result.is_err() {
            self.drop_link();
        }
        result
    }

    /// Bloqueia até haver ao menos um byte (ou o prazo expirar) e devolve
    /// todos os bytes disponíveis, inclusive os que chegam em segmentos
    /// seguintes dentro de uma janela curta.
    pub fn await_response(&mut self) -> Result<Vec<u8>, ResponseError> {
        let Some(link) = self.link.as_mut() else {
            return Err(ResponseError::Closed);
        };

        let result = read_response(link);

        // Uma resposta atrasada confundiria o próximo ciclo
        if result.is_err() {
            self.drop_link();
        }
        result
    }

    fn drop_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.shutdown();
        }
        *self.state = ConnectionState::Disconnected;
    }
}

fn read_response<L: Link>(link: &mut L) -> Result<Vec<u8>, ResponseError> {
    let mut buf = [0u8; RESPONSE_BUF_SIZE];
    let first = loop {
        match link.read(&mut buf) {
            Ok(0) => return Err(ResponseError::Closed),
            Ok(n) => break n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => return Err(ResponseError::Timeout),
            Err(e) => return Err(ResponseError::Io(e)),
        }
    };

    let mut response = buf[..first].to_vec();
    link.set_draining(true).map_err(ResponseError::Io)?;
    while response.len() < RESPONSE_BUF_SIZE {
        let room = RESPONSE_BUF_SIZE - response.len();
        match link.read(&mut buf[..room]) {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => break,
            Err(e) => {
                debug!("Erro ao drenar resposta: {e}");
                break;
            }
        }
    }
    link.set_draining(false).map_err(ResponseError::Io)?;

    Ok(response)
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn write_frame<L: Link>(link: &mut L, frame: &Frame, transmit: Transmit) -> io::Result<()> {
    match transmit {
        Transmit::Atomic => link.write_all(&frame.to_bytes())?,
        Transmit::Split { pause } => {
            link.write_all(frame.header())?;
            link.flush()?;
            std::thread::sleep(pause);
            link.write_all(frame.payload())?;
        }
    }
    link.flush()
}

// ──────────────────────────────────────────────
// Stubs de transporte para testes
// ──────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// O que a próxima leitura do link devolve.
    ///
    /// `Timeout` também separa respostas de ciclos diferentes: a drenagem
    /// para nele.
    #[derive(Debug, Clone)]
    pub enum Reply {
        Bytes(Vec<u8>),
        Eof,
        Timeout,
    }

    #[derive(Debug, Default)]
    pub struct StubState {
        pub attempts: u32,
        pub fail_first: u32,
        pub always_fail: bool,
        pub alive: bool,
        pub fail_writes: bool,
        pub replies: VecDeque<Reply>,
        pub writes: Vec<Vec<u8>>,
        pub shutdowns: u32,
        pub draining: bool,
        pub drain_toggles: u32,
    }

    /// Conector em memória com contadores compartilhados.
    #[derive(Clone, Default)]
    pub struct StubConnector {
        pub state: Rc<RefCell<StubState>>,
    }

    impl StubConnector {
        pub fn failing_first(k: u32) -> Self {
            let stub = Self::default();
            stub.state.borrow_mut().fail_first = k;
            stub
        }

        pub fn always_failing() -> Self {
            let stub = Self::default();
            stub.state.borrow_mut().always_fail = true;
            stub
        }

        pub fn push_reply(&self, reply: Reply) {
            self.state.borrow_mut().replies.push_back(reply);
        }

        pub fn attempts(&self) -> u32 {
            self.state.borrow().attempts
        }

        pub fn set_alive(&self, alive: bool) {
            self.state.borrow_mut().alive = alive;
        }

        /// Todos os bytes escritos, concatenados.
        pub fn written(&self) -> Vec<u8> {
            self.state.borrow().writes.concat()
        }
    }

    impl Connector for StubConnector {
        type Link = StubLink;

        fn connect(&mut self) -> io::Result<StubLink> {
            let mut s = self.state.borrow_mut();
            s.attempts += 1;
            if s.always_fail || s.attempts <= s.fail_first {
                return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
            }
            s.alive = true;
            Ok(StubLink {
                state: Rc::clone(&self.state),
            })
        }

        fn endpoint(&self) -> String {
            "stub:0".into()
        }
    }

    pub struct StubLink {
        state: Rc<RefCell<StubState>>,
    }

    impl Read for StubLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut s = self.state.borrow_mut();
            match s.replies.pop_front() {
                Some(Reply::Bytes(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Some(Reply::Eof) => {
                    s.alive = false;
                    Ok(0)
                }
                Some(Reply::Timeout) | None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }
    }

    impl Write for StubLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut s = self.state.borrow_mut();
            if s.fail_writes {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            s.writes.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Link for StubLink {
        fn is_alive(&self) -> bool {
            self.state.borrow().alive
        }

        fn set_draining(&mut self, draining: bool) -> io::Result<()> {
            let mut s = self.state.borrow_mut();
            s.draining = draining;
            s.drain_toggles += 1;
            Ok(())
        }

        fn shutdown(&mut self) {
            let mut s = self.state.borrow_mut();
            s.alive = false;
            s.shutdowns += 1;
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
