//! Socket types, options, the per-pattern routing implementations and the
//! core socket state machine.

pub mod core;
pub mod options;
pub(crate) mod patterns;
pub mod types;

mod dealer_socket;
mod pair_socket;
mod pub_socket;
mod pull_socket;
mod push_socket;
mod rep_socket;
mod req_socket;
mod router_socket;
mod sub_socket;
mod xpub_socket;
mod xsub_socket;

use crate::error::MqError;
use crate::message::Msg;

use crate::socket::patterns::PipeSet;
use crate::socket::types::SocketType;

use dealer_socket::DealerSocket;
use pair_socket::PairSocket;
use pub_socket::PubSocket;
use pull_socket::PullSocket;
use push_socket::PushSocket;
use rep_socket::RepSocket;
use req_socket::ReqSocket;
use router_socket::RouterSocket;
use sub_socket::SubSocket;
use xpub_socket::XPubSocket;
use xsub_socket::XSubSocket;

/// Per-socket-type routing behaviour, dispatched as a tagged variant so
/// every handler is an exhaustive match.
#[derive(Debug)]
pub(crate) enum PatternKind {
  Pair(PairSocket),
  Push(PushSocket),
  Pull(PullSocket),
  Dealer(DealerSocket),
  Router(RouterSocket),
  Req(ReqSocket),
  Rep(RepSocket),
  Pub(PubSocket),
  XPub(XPubSocket),
  Sub(SubSocket),
  XSub(XSubSocket),
}

impl PatternKind {
  pub fn new(socket_type: SocketType) -> Self {
    match socket_type {
      SocketType::Pair => PatternKind::Pair(PairSocket::new()),
      SocketType::Push => PatternKind::Push(PushSocket::new()),
      SocketType::Pull => PatternKind::Pull(PullSocket::new()),
      SocketType::Dealer => PatternKind::Dealer(DealerSocket::new()),
      SocketType::Router => PatternKind::Router(RouterSocket::new()),
      SocketType::Req => PatternKind::Req(ReqSocket::new()),
      SocketType::Rep => PatternKind::Rep(RepSocket::new()),
      SocketType::Pub => PatternKind::Pub(PubSocket::new()),
      SocketType::XPub => PatternKind::XPub(XPubSocket::new(true)),
      SocketType::Sub => PatternKind::Sub(SubSocket::new()),
      SocketType::XSub => PatternKind::XSub(XSubSocket::new(false)),
    }
  }

  pub fn xattach_pipe(&mut self, set: &mut PipeSet, pipe_id: usize) {
    match self {
      PatternKind::Pair(p) => p.xattach_pipe(set, pipe_id),
      PatternKind::Push(p) => p.xattach_pipe(set, pipe_id),
      PatternKind::Pull(p) => p.xattach_pipe(set, pipe_id),
      PatternKind::Dealer(p) => p.xattach_pipe(set, pipe_id),
      PatternKind::Router(p) => p.xattach_pipe(set, pipe_id),
      PatternKind::Req(p) => p.xattach_pipe(set, pipe_id),
      PatternKind::Rep(p) => p.xattach_pipe(set, pipe_id),
      PatternKind::Pub(p) => p.inner_mut().xattach_pipe(set, pipe_id),
      PatternKind::XPub(p) => p.xattach_pipe(set, pipe_id),
      PatternKind::Sub(p) => p.inner_mut().xattach_pipe(set, pipe_id),
      PatternKind::XSub(p) => p.xattach_pipe(set, pipe_id),
    }
  }

  pub fn xread_activated(&mut self, set: &mut PipeSet, pipe_id: usize) {
    match self {
      PatternKind::Pair(_) => {}
      PatternKind::Push(_) => {}
      PatternKind::Pull(p) => p.xread_activated(set, pipe_id),
      PatternKind::Dealer(p) => p.xread_activated(set, pipe_id),
      PatternKind::Router(p) => p.xread_activated(set, pipe_id),
      PatternKind::Req(p) => p.xread_activated(set, pipe_id),
      PatternKind::Rep(p) => p.xread_activated(set, pipe_id),
      PatternKind::Pub(p) => p.inner_mut().xread_activated(set, pipe_id),
      PatternKind::XPub(p) => p.xread_activated(set, pipe_id),
      PatternKind::Sub(p) => p.inner_mut().xread_activated(set, pipe_id),
      PatternKind::XSub(p) => p.xread_activated(set, pipe_id),
    }
  }

  pub fn xwrite_activated(&mut self, set: &mut PipeSet, pipe_id: usize) {
    match self {
      PatternKind::Pair(_) => {}
      PatternKind::Push(p) => p.xwrite_activated(set, pipe_id),
      PatternKind::Pull(_) => {}
      PatternKind::Dealer(p) => p.xwrite_activated(set, pipe_id),
      PatternKind::Router(_) => {}
      PatternKind::Req(p) => p.xwrite_activated(set, pipe_id),
      PatternKind::Rep(_) => {}
      PatternKind::Pub(p) => p.inner_mut().xwrite_activated(set, pipe_id),
      PatternKind::XPub(p) => p.xwrite_activated(set, pipe_id),
      PatternKind::Sub(p) => p.inner_mut().xwrite_activated(set, pipe_id),
      PatternKind::XSub(p) => p.xwrite_activated(set, pipe_id),
    }
  }

  pub fn xhiccuped(&mut self, set: &mut PipeSet, pipe_id: usize) {
    match self {
      PatternKind::Sub(p) => p.inner_mut().xhiccuped(set, pipe_id),
      PatternKind::XSub(p) => p.xhiccuped(set, pipe_id),
      PatternKind::XPub(p) => p.xhiccuped(set, pipe_id),
      PatternKind::Pub(p) => p.inner_mut().xhiccuped(set, pipe_id),
      _ => {}
    }
  }

  pub fn xpipe_terminated(&mut self, set: &mut PipeSet, pipe_id: usize) {
    match self {
      PatternKind::Pair(p) => p.xpipe_terminated(set, pipe_id),
      PatternKind::Push(p) => p.xpipe_terminated(set, pipe_id),
      PatternKind::Pull(p) => p.xpipe_terminated(set, pipe_id),
      PatternKind::Dealer(p) => p.xpipe_terminated(set, pipe_id),
      PatternKind::Router(p) => p.xpipe_terminated(set, pipe_id),
      PatternKind::Req(p) => p.xpipe_terminated(set, pipe_id),
      PatternKind::Rep(p) => p.xpipe_terminated(set, pipe_id),
      PatternKind::Pub(p) => p.inner_mut().xpipe_terminated(set, pipe_id),
      PatternKind::XPub(p) => p.xpipe_terminated(set, pipe_id),
      PatternKind::Sub(p) => p.inner_mut().xpipe_terminated(set, pipe_id),
      PatternKind::XSub(p) => p.xpipe_terminated(set, pipe_id),
    }
  }

  pub fn xsend(&mut self, set: &mut PipeSet, msg: Msg) -> Result<(), (Msg, MqError)> {
    match self {
      PatternKind::Pair(p) => p.xsend(set, msg),
      PatternKind::Push(p) => p.xsend(set, msg),
      PatternKind::Pull(p) => p.xsend(set, msg),
      PatternKind::Dealer(p) => p.xsend(set, msg),
      PatternKind::Router(p) => p.xsend(set, msg),
      PatternKind::Req(p) => p.xsend(set, msg),
      PatternKind::Rep(p) => p.xsend(set, msg),
      PatternKind::Pub(p) => p.xsend(set, msg),
      PatternKind::XPub(p) => p.xsend(set, msg),
      PatternKind::Sub(p) => p.xsend(set, msg),
      PatternKind::XSub(p) => p.xsend(set, msg),
    }
  }

  pub fn xrecv(&mut self, set: &mut PipeSet) -> Result<Msg, MqError> {
    match self {
      PatternKind::Pair(p) => p.xrecv(set),
      PatternKind::Push(p) => p.xrecv(set),
      PatternKind::Pull(p) => p.xrecv(set),
      PatternKind::Dealer(p) => p.xrecv(set),
      PatternKind::Router(p) => p.xrecv(set),
      PatternKind::Req(p) => p.xrecv(set),
      PatternKind::Rep(p) => p.xrecv(set),
      PatternKind::Pub(p) => p.xrecv(set),
      PatternKind::XPub(p) => p.xrecv(set),
      PatternKind::Sub(p) => p.inner_mut().xrecv(set),
      PatternKind::XSub(p) => p.xrecv(set),
    }
  }

  pub fn xhas_in(&mut self, set: &mut PipeSet) -> bool {
    match self {
      PatternKind::Pair(p) => p.xhas_in(set),
      PatternKind::Push(_) => false,
      PatternKind::Pull(p) => p.xhas_in(set),
      PatternKind::Dealer(p) => p.xhas_in(set),
      PatternKind::Router(p) => p.xhas_in(set),
      PatternKind::Req(p) => p.xhas_in(set),
      PatternKind::Rep(p) => p.xhas_in(set),
      PatternKind::Pub(_) => false,
      PatternKind::XPub(p) => p.xhas_in(set),
      PatternKind::Sub(p) => p.inner_mut().xhas_in(set),
      PatternKind::XSub(p) => p.xhas_in(set),
    }
  }

  pub fn xhas_out(&mut self, set: &mut PipeSet) -> bool {
    match self {
      PatternKind::Pair(p) => p.xhas_out(set),
      PatternKind::Push(p) => p.xhas_out(set),
      PatternKind::Pull(_) => false,
      PatternKind::Dealer(p) => p.xhas_out(set),
      PatternKind::Router(p) => p.xhas_out(set),
      PatternKind::Req(p) => p.xhas_out(set),
      PatternKind::Rep(p) => p.xhas_out(set),
      PatternKind::Pub(p) => p.inner_mut().xhas_out(set),
      PatternKind::XPub(p) => p.xhas_out(set),
      PatternKind::Sub(p) => p.xhas_out(set),
      PatternKind::XSub(p) => p.xhas_out(set),
    }
  }

  /// Pattern-level option handling; returns Ok(false) when the option is
  /// not pattern-specific so the caller falls through to the generic set.
  pub fn xsetsockopt(&mut self, set: &mut PipeSet, option: i32, value: &[u8]) -> Result<bool, MqError> {
    match self {
      PatternKind::Router(p) => p.xsetsockopt(option, value),
      PatternKind::Rep(p) => p.router_mut().xsetsockopt(option, value),
      PatternKind::Req(p) => p.xsetsockopt(option, value),
      PatternKind::XPub(p) => p.xsetsockopt(option, value),
      PatternKind::Pub(p) => p.inner_mut().xsetsockopt(option, value),
      PatternKind::Sub(p) => p.xsetsockopt(set, option, value),
      _ => Ok(false),
    }
  }
}
