#![no_main]

use bytes::BytesMut;
use embedldap::ldap::codec::decode_message;
use embedldap::ldap::LdapCodec;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Framing must never panic, whatever the peer sends
    let mut buf = BytesMut::from(data);
    let mut codec = LdapCodec::default();
    while let Ok(Some(_message)) = codec.decode(&mut buf) {}

    let _ = decode_message(data);
});
