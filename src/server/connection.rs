use crate::directory::DirectoryService;
use crate::ldap::protocol::LdapProtocolOp;
use crate::ldap::{handle_operation, LdapCodec};
use crate::server::session::LdapSession;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

pub async fn handle_connection<S: DirectoryService + ?Sized>(
    socket: TcpStream,
    service: Arc<S>,
    mut shutdown: watch::Receiver<bool>,
) -> crate::Result<()> {
    let peer_addr = socket.peer_addr()?;
    debug!("Handling connection from {}", peer_addr);

    let mut framed = Framed::new(socket, LdapCodec::default());
    let mut session = LdapSession::new();

    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => {
                debug!("Server stopping, closing connection from {}", peer_addr);
                break;
            }
            next = framed.next() => match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    warn!("Dropping connection from {}: {}", peer_addr, e);
                    break;
                }
                None => break,
            },
        };

        debug!(
            "Received {} request {} from {}",
            message.protocol_op.name(),
            message.message_id,
            peer_addr
        );

        if matches!(message.protocol_op, LdapProtocolOp::UnbindRequest) {
            info!("Client {} unbound, closing connection", peer_addr);
            break;
        }

        for response in handle_operation(message, service.as_ref(), &mut session) {
            framed.send(response).await?;
        }
    }

    debug!("Connection closed for {}", peer_addr);
    Ok(())
}
