//! Pooled PostgreSQL connections with TLS support.
//!
//! Each job opens two short-lived pools, one per side. Pools are sized by a
//! small constant and destroyed explicitly on both exit paths of a job.

use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use rustls::ClientConfig;
use tokio_postgres::Config as PgConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, warn};

use crate::config::{ConnectionSpec, TlsMode};
use crate::error::{Result, SyncError};

/// Connection timeout for pool members.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connections per job-scoped pool.
const POOL_SIZE: usize = 4;

/// A job-scoped connection pool for one side of a replication job.
pub struct DbPool {
    pool: Pool,
    label: &'static str,
}

impl DbPool {
    /// Open a pool for a connection descriptor and verify it with `SELECT 1`.
    pub async fn connect(spec: &ConnectionSpec, label: &'static str) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&spec.host);
        pg_config.port(spec.port);
        pg_config.dbname(&spec.database);
        pg_config.user(&spec.user);
        pg_config.password(&spec.password);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(CONNECT_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = if tls_active(spec) {
            let tls_config = build_tls_config(spec);
            let tls_connector = MakeRustlsConnect::new(tls_config);
            let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
            Pool::builder(mgr)
                .max_size(POOL_SIZE)
                .build()
                .map_err(|e| SyncError::pool(e, format!("creating {label} pool")))?
        } else {
            warn!("TLS is disabled for the {label} connection; credentials travel in plaintext");
            let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
            Pool::builder(mgr)
                .max_size(POOL_SIZE)
                .build()
                .map_err(|e| SyncError::pool(e, format!("creating {label} pool")))?
        };

        // Probe connection
        let client = pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, format!("testing {label} connection")))?;
        client.simple_query("SELECT 1").await?;

        debug!(
            "Connected to {} database: {}:{}/{}",
            label, spec.host, spec.port, spec.database
        );

        Ok(Self { pool, label })
    }

    /// Check out a connection.
    pub async fn get(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, format!("getting {} connection", self.label)))
    }

    /// Close the pool, dropping all idle connections.
    pub fn close(&self) {
        self.pool.close();
    }

    /// The underlying pool, for wiring a database-backed job store.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

/// Effective TLS decision: the block's master switch wins over the mode.
fn tls_active(spec: &ConnectionSpec) -> bool {
    spec.tls.enabled && spec.tls.mode != TlsMode::Disable
}

/// Build the rustls client config for a connection.
///
/// `verify_peer` selects between webpki root verification and the
/// non-verifying path; `prefer` behaves like `require` because the driver
/// negotiates TLS up front rather than falling back per attempt.
fn build_tls_config(spec: &ConnectionSpec) -> ClientConfig {
    if spec.tls.verify_peer {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    } else {
        warn!(
            "tls.mode={}: TLS enabled but server certificate is not verified. \
             Set verify_peer for production.",
            spec.tls.mode
        );
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    }
}

/// Certificate verifier that accepts any certificate.
///
/// Used only when the caller enables TLS without `verify_peer`; the
/// connection is encrypted but open to man-in-the-middle interception.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
