//! Protocolo de comunicação do uplink.
//!
//! Cada leitura viaja como um frame com cabeçalho de largura fixa:
//!
//! ```text
//! ┌──────────────────────────────────────┬──────────────────┐
//! │ Header (64) "55" + espaços           │ Payload JSON (N) │
//! └──────────────────────────────────────┴──────────────────┘
//! ```
//!
//! - O header contém o tamanho **exato** do payload em decimal ASCII,
//!   completado com espaços até `header_width` bytes
//! - O payload é JSON compacto com campos nomeados
//! - O coletor responde com bytes iniciados por `ACK` em caso de sucesso

use crate::types::Reading;
use std::io::{self, Read};

/// Largura do header na implantação de referência.
pub const DEFAULT_HEADER_WIDTH: usize = 64;

/// Caractere de preenchimento do header (não numérico).
pub const HEADER_FILLER: u8 = b' ';

/// Prefixo da resposta de confirmação.
pub const ACK_TOKEN: &[u8] = b"ACK";

/// Resposta do coletor para payload que não decodifica.
pub const NAK_TOKEN: &[u8] = b"NAK";

/// Mensagem de controle enviada antes de encerrar a conexão.
pub const DISCONNECT_MESSAGE: &str = "!DISCONNECT";

/// Erros do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Payload de {len} bytes não cabe em header de {header_width} caracteres")]
    PayloadTooLarge { len: usize, header_width: usize },

    #[error("Header inválido: {0:?}")]
    InvalidHeader(String),

    #[error("Frame truncado: esperado {expected} bytes, recebido {received}")]
    Truncated { expected: usize, received: usize },

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),

    #[error("Erro de I/O: {0}")]
    Io(#[from] io::Error),
}

// ──────────────────────────────────────────────
// Codec do payload
// ──────────────────────────────────────────────

/// Serializa uma [`Reading`] em JSON compacto.
///
/// A saída é determinística: mesma leitura, mesmos bytes.
pub fn encode_reading(reading: &Reading) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(reading).map_err(|e| ProtocolError::Serialize(e.to_string()))
}

/// Decodifica um payload JSON em [`Reading`], independente da ordem dos campos.
pub fn decode_reading(payload: &[u8]) -> Result<Reading, ProtocolError> {
    serde_json::from_slice(payload).map_err(|e| ProtocolError::Deserialize(e.to_string()))
}

// ──────────────────────────────────────────────
// Frame
// ──────────────────────────────────────────────

/// Frame pronto para transmissão: header de largura fixa + payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: Vec<u8>,
    payload: Vec<u8>,
}

impl Frame {
    /// Bytes do header, sempre com exatamente `header_width` bytes.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Header e payload concatenados para uma única escrita.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.len() + self.payload.len());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Tamanho total em bytes no fio.
    pub fn wire_len(&self) -> usize {
        self.header.len() + self.payload.len()
    }
}

/// Envolve `payload` em um frame com header de `header_width` bytes.
///
/// Falha com [`ProtocolError::PayloadTooLarge`] se a representação decimal
/// do tamanho não couber no header. Não existe outro limite de tamanho.
pub fn frame(payload: Vec<u8>, header_width: usize) -> Result<Frame, ProtocolError> {
    let len = payload.len();
    let digits = len.to_string();
    if digits.len() > header_width {
        return Err(ProtocolError::PayloadTooLarge { len, header_width });
    }

    let mut header = Vec::with_capacity(header_width);
    header.extend_from_slice(digits.as_bytes());
    header.resize(header_width, HEADER_FILLER);

    Ok(Frame { header, payload })
}

/// Atalho: codifica a leitura e monta o frame.
pub fn frame_reading(reading: &Reading, header_width: usize) -> Result<Frame, ProtocolError> {
    frame(encode_reading(reading)?, header_width)
}

/// Monta o frame da mensagem de controle de desconexão.
pub fn disconnect_frame(header_width: usize) -> Result<Frame, ProtocolError> {
    frame(DISCONNECT_MESSAGE.as_bytes().to_vec(), header_width)
}

/// Interpreta um header recebido e retorna o tamanho do payload.
///
/// Ignora o preenchimento; qualquer outro caractere não decimal é erro.
pub fn parse_header(header: &[u8]) -> Result<usize, ProtocolError> {
    let text = std::str::from_utf8(header)
        .map_err(|_| ProtocolError::InvalidHeader(String::from_utf8_lossy(header).into_owned()))?;
    let digits = text.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidHeader(text.to_string()));
    }
    digits
        .parse::<usize>()
        .map_err(|_| ProtocolError::InvalidHeader(text.to_string()))
}

/// Lê um frame completo de um stream bloqueante.
///
/// Retorna `Ok(None)` se o stream terminar limpo antes do primeiro byte do
/// header (peer fechou a conexão entre frames).
pub fn read_frame<R: Read>(
    reader: &mut R,
    header_width: usize,
) -> Result<Option<Vec<u8>>, ProtocolError> {
    let mut header = vec![0u8; header_width];
    let got = read_full(reader, &mut header)?;
    if got == 0 {
        return Ok(None);
    }
    if got < header_width {
        return Err(ProtocolError::Truncated {
            expected: header_width,
            received: got,
        });
    }

    // O header não é confiável: o buffer cresce com os bytes que chegam,
    // nunca com o tamanho anunciado
    let len = parse_header(&header)?;
    let mut payload = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut payload)?;
    if payload.len() < len {
        return Err(ProtocolError::Truncated {
            expected: len,
            received: payload.len(),
        });
    }

    Ok(Some(payload))
}

/// Preenche `buf` até o fim ou até EOF; retorna quantos bytes foram lidos.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ──────────────────────────────────────────────
// Resposta
// ──────────────────────────────────────────────

/// `true` se a resposta do coletor confirma o recebimento.
pub fn is_ack(response: &[u8]) -> bool {
    response.starts_with(ACK_TOKEN)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
