//! Opening authenticated connections, prompting where the session allows.

use crate::ads::administrator_dn;
use crate::console::Console;
use crate::directory::{ConnectionTarget, Connector, Directory, DirectoryError};
use crate::error::{ReplicationCliError, Result, ReturnCode};
use crate::user_data::{AdminCredentials, ServerConnection, Session};
use tracing::{debug, warn};

const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

fn target(session: &Session, conn: &ServerConnection, password: String) -> ConnectionTarget {
    ConnectionTarget {
        host: conn.host.clone(),
        port: conn.port,
        security: conn.security,
        bind_dn: conn.bind_dn.clone(),
        password,
        trust_all: session.trust_all,
        connect_timeout: session.connect_timeout,
    }
}

/// Connect to a server named on the command line. In interactive sessions
/// an untrusted certificate can be accepted for the session and rejected
/// credentials can be typed again.
pub async fn connect(
    session: &Session,
    connector: &dyn Connector,
    console: &Console,
    conn: &ServerConnection,
) -> Result<Box<dyn Directory>> {
    let password = match &conn.password {
        Some(password) => password.clone(),
        None => console.ask_password(&format!("Password for {} on {}", conn.bind_dn, conn.address()))?,
    };
    let mut target = target(session, conn, password);
    let mut attempts = 0;

    loop {
        match connector.connect(&target).await {
            Ok(dir) => {
                debug!("connected to {} as {}", target.address(), target.bind_dn);
                return Ok(dir);
            }
            Err(DirectoryError::UntrustedCertificate { address, msg })
                if console.is_interactive() && !target.trust_all =>
            {
                console.println(&format!(
                    "The server {} presented a certificate that is not trusted: {}",
                    address, msg
                ));
                if !console.confirm("Trust this certificate for the rest of this session?", false)? {
                    return Err(ReplicationCliError::new(
                        ReturnCode::UserCancelled,
                        format!("The certificate of {} was rejected.", address),
                    ));
                }
                warn!("certificate of {} accepted for this session", address);
                target.trust_all = true;
            }
            Err(DirectoryError::InvalidCredentials { address, bind_dn })
                if console.is_interactive() && attempts < MAX_CREDENTIAL_ATTEMPTS =>
            {
                attempts += 1;
                console.error(&format!("Invalid credentials for {} on {}.", bind_dn, address));
                target.password = console.ask_password(&format!("Password for {} on {}", bind_dn, address))?;
            }
            Err(e) => {
                return Err(ReplicationCliError::with_source(
                    ReturnCode::ErrorConnecting,
                    format!("Could not connect to {}: {}", conn.address(), e),
                    e,
                ))
            }
        }
    }
}

/// Connection template for the other servers of a topology, bound as the
/// global administrator on their administration port.
pub fn admin_target(session: &Session, admin: &AdminCredentials, host: &str, port: u16) -> ConnectionTarget {
    ConnectionTarget {
        host: host.to_string(),
        port,
        security: session.config.default_security,
        bind_dn: administrator_dn(&admin.uid),
        password: admin.password.clone().unwrap_or_default(),
        trust_all: session.trust_all,
        connect_timeout: session.connect_timeout,
    }
}
