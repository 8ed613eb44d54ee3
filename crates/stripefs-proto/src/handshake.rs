//! Token-authenticated session handshake
//!
//! Runs once per connection, before any operation request:
//!
//! ```text
//! client → server: magic(4) version(1) access_mode(1) token_len(2) token
//! server → client: status(1)
//! ```
//!
//! Token issuance and validation live with the node's token provider;
//! this module only moves the bytes.

use stripefs_common::{AccessMode, BlockToken, Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::{STATUS_ACCESS_DENIED, STATUS_SUCCESS};

/// "STFT"
pub const HANDSHAKE_MAGIC: u32 = 0x5354_4654;

/// Protocol version spoken by this node
pub const TRANSFER_VERSION: u8 = 1;

/// Largest token a peer will accept
const MAX_TOKEN_LEN: usize = 16 * 1024;

/// Client half: present a token scoped to `mode` and wait for the verdict.
pub async fn client_handshake<S>(stream: &mut S, token: &BlockToken, mode: AccessMode) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if token.len() > MAX_TOKEN_LEN {
        return Err(Error::protocol("block token too large"));
    }
    stream.write_u32(HANDSHAKE_MAGIC).await?;
    stream.write_u8(TRANSFER_VERSION).await?;
    stream.write_u8(mode.code()).await?;
    stream.write_u16(token.len() as u16).await?;
    stream.write_all(token.as_bytes()).await?;
    stream.flush().await?;

    match stream.read_u8().await? {
        STATUS_SUCCESS => Ok(()),
        STATUS_ACCESS_DENIED => Err(Error::AccessDenied),
        other => Err(Error::Protocol(format!(
            "handshake rejected with status {other}"
        ))),
    }
}

/// Server half: read the client's greeting and return the requested mode
/// and token. The caller validates the token and answers with
/// [`respond`].
pub async fn serve_handshake<S>(stream: &mut S) -> Result<(AccessMode, BlockToken)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let magic = stream.read_u32().await?;
    if magic != HANDSHAKE_MAGIC {
        return Err(Error::Protocol(format!("bad handshake magic: {magic:#x}")));
    }
    let version = stream.read_u8().await?;
    if version != TRANSFER_VERSION {
        return Err(Error::Protocol(format!(
            "unsupported transfer version {version}"
        )));
    }
    let mode = AccessMode::from_code(stream.read_u8().await?)
        .ok_or_else(|| Error::protocol("unknown access mode"))?;
    let token_len = stream.read_u16().await? as usize;
    let mut token = vec![0u8; token_len];
    stream.read_exact(&mut token).await?;
    Ok((mode, BlockToken::new(token)))
}

/// Server half: deliver the handshake verdict.
pub async fn respond<S>(stream: &mut S, status: u8) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_u8(status).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let token = BlockToken::new(&b"tok-123"[..]);

        let client_side = async {
            client_handshake(&mut client, &token, AccessMode::Read).await
        };
        let server_side = async {
            let (mode, got) = serve_handshake(&mut server).await?;
            assert_eq!(mode, AccessMode::Read);
            assert_eq!(got.as_bytes(), b"tok-123");
            respond(&mut server, STATUS_SUCCESS).await
        };
        let (c, s) = tokio::join!(client_side, server_side);
        c.unwrap();
        s.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_denied() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let token = BlockToken::default();

        let client_side = async {
            client_handshake(&mut client, &token, AccessMode::Write).await
        };
        let server_side = async {
            let _ = serve_handshake(&mut server).await?;
            respond(&mut server, STATUS_ACCESS_DENIED).await
        };
        let (c, s) = tokio::join!(client_side, server_side);
        assert!(matches!(c, Err(Error::AccessDenied)));
        s.unwrap();
    }

    #[tokio::test]
    async fn test_bad_magic() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(0xdead_beef).await.unwrap();
        client.write_all(&[0u8; 8]).await.unwrap();
        let err = serve_handshake(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
