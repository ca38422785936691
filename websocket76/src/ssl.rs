use std::io;

use native_tls::TlsConnector;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_native_tls::TlsStream;

pub(crate) async fn wrap<S: AsyncRead + AsyncWrite + Unpin>(domain: &str, stream: S) -> io::Result<TlsStream<S>> {
    let cx = TlsConnector::builder()
        .build()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    tokio_native_tls::TlsConnector::from(cx)
        .connect(domain, stream)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}
