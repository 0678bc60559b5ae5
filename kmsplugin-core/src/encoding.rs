//! Conversion between functional options and their wire form.
//!
//! The host packs the options it was given into the option structs of
//! [`crate::format`]; the plugin unpacks them again so that its implementation sees
//! the same kind of options it would if it were called directly.

use chrono::{DateTime, Utc};

use crate::{
    context::Context,
    format::{MessageOptions, PublicKeyOptions, RpcOptions, SignOptions, VerifyOptions},
    options::{MessageOption, MethodOption, PublicKeyOption, RpcOption, SignOption, VerifyOption},
};

/// A fresh context bound to `deadline`, or a background context if there is none.
pub fn context_from_deadline(deadline: Option<DateTime<Utc>>) -> Context {
    match deadline {
        // Nothing can cancel a rebuilt context early, so the cancel handle is not kept.
        Some(deadline) => Context::background().with_deadline(deadline).0,
        None => Context::background(),
    }
}

pub fn pack_rpc_options<O: MethodOption>(opts: &[O]) -> RpcOptions {
    let mut packed = RpcOptions::default();
    for opt in opts.iter().filter_map(MethodOption::rpc) {
        match opt {
            RpcOption::Context(ctx) => packed.ctx_deadline = ctx.deadline(),
            RpcOption::KeyVersion(v) => packed.key_version = Some(v.clone()),
            RpcOption::RemoteVerification(r) => packed.remote_verification = Some(*r),
        }
    }
    packed
}

pub fn pack_message_options<O: MethodOption>(opts: &[O]) -> MessageOptions {
    let mut packed = MessageOptions::default();
    for opt in opts.iter().filter_map(MethodOption::message) {
        match opt {
            MessageOption::Digest(d) => packed.digest = Some(d.clone()),
            MessageOption::HashFunc(h) => packed.hash_func = Some(*h),
        }
    }
    packed
}

pub fn pack_public_key_options(opts: &[PublicKeyOption]) -> PublicKeyOptions {
    PublicKeyOptions {
        rpc_options: pack_rpc_options(opts),
    }
}

pub fn pack_sign_options(opts: &[SignOption]) -> SignOptions {
    SignOptions {
        rpc_options: pack_rpc_options(opts),
        message_options: pack_message_options(opts),
    }
}

pub fn pack_verify_options(opts: &[VerifyOption]) -> VerifyOptions {
    VerifyOptions {
        rpc_options: pack_rpc_options(opts),
        message_options: pack_message_options(opts),
    }
}

pub fn unpack_rpc_options(packed: &RpcOptions) -> Vec<RpcOption> {
    let mut opts = vec![];
    if let Some(deadline) = packed.ctx_deadline {
        opts.push(RpcOption::Context(context_from_deadline(Some(deadline))));
    }
    if let Some(key_version) = &packed.key_version {
        opts.push(RpcOption::KeyVersion(key_version.clone()));
    }
    if let Some(remote_verification) = packed.remote_verification {
        opts.push(RpcOption::RemoteVerification(remote_verification));
    }
    opts
}

pub fn unpack_message_options(packed: &MessageOptions) -> Vec<MessageOption> {
    let mut opts = vec![];
    if let Some(digest) = &packed.digest {
        opts.push(MessageOption::Digest(digest.clone()));
    }
    if let Some(hash) = packed.hash_func {
        opts.push(MessageOption::HashFunc(hash));
    }
    opts
}

pub fn unpack_public_key_options(packed: &PublicKeyOptions) -> Vec<PublicKeyOption> {
    unpack_rpc_options(&packed.rpc_options)
        .into_iter()
        .map(PublicKeyOption::from)
        .collect()
}

pub fn unpack_sign_options(packed: &SignOptions) -> Vec<SignOption> {
    unpack_rpc_options(&packed.rpc_options)
        .into_iter()
        .map(SignOption::from)
        .chain(
            unpack_message_options(&packed.message_options)
                .into_iter()
                .map(SignOption::from),
        )
        .collect()
}

pub fn unpack_verify_options(packed: &VerifyOptions) -> Vec<VerifyOption> {
    unpack_rpc_options(&packed.rpc_options)
        .into_iter()
        .map(VerifyOption::from)
        .chain(
            unpack_message_options(&packed.message_options)
                .into_iter()
                .map(VerifyOption::from),
        )
        .collect()
}
