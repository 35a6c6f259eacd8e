//! Live connections and their role-specific state.
//!
//! Pure bookkeeping: the registry never touches a socket. Callers own the
//! socket lifecycle and tell the registry when a connection comes and goes.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use relay_proto::Role;

use crate::outbound::Outbound;

/// Handle assigned to a connection when it is accepted. Ordered by attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// State carried by a page connection.
#[derive(Debug, Clone)]
pub struct PageState {
    disambiguator: String,
    identity: Option<String>,
}

impl PageState {
    /// Short random tag fixed at connect time.
    pub fn disambiguator(&self) -> &str {
        &self.disambiguator
    }

    /// Directory identity, unset until the page's first log record.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }
}

#[derive(Debug, Clone)]
pub enum Peer {
    Page(PageState),
    Viewer,
}

#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    peer: Peer,
    outbound: Outbound,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        match self.peer {
            Peer::Page(_) => Role::Page,
            Peer::Viewer => Role::Viewer,
        }
    }

    pub fn page(&self) -> Option<&PageState> {
        match &self.peer {
            Peer::Page(page) => Some(page),
            Peer::Viewer => None,
        }
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, Connection>,
    tag_len: usize,
}

impl ConnectionRegistry {
    pub fn new(tag_len: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            tag_len: tag_len.max(1),
        }
    }

    /// Adds a connection. Pages are given a disambiguator no other live page holds.
    pub fn register(&mut self, id: ConnectionId, role: Role, outbound: Outbound) -> &Connection {
        let peer = match role {
            Role::Viewer => Peer::Viewer,
            Role::Page => Peer::Page(PageState {
                disambiguator: self.fresh_tag(),
                identity: None,
            }),
        };
        self.connections
            .entry(id)
            .or_insert(Connection { id, peer, outbound })
    }

    /// Sets a page's identity if it has none yet. Returns `true` when it was set.
    pub fn set_page_identity(&mut self, id: ConnectionId, identity: String) -> bool {
        match self.connections.get_mut(&id).map(|c| &mut c.peer) {
            Some(Peer::Page(page)) if page.identity.is_none() => {
                page.identity = Some(identity);
                true
            }
            _ => false,
        }
    }

    /// Removes a connection. Safe to call again for an id that is already gone.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn all_pages(&self) -> impl Iterator<Item = (&Connection, &PageState)> {
        self.connections
            .values()
            .filter_map(|conn| conn.page().map(|page| (conn, page)))
    }

    pub fn all_viewers(&self) -> impl Iterator<Item = &Connection> {
        self.connections
            .values()
            .filter(|conn| matches!(conn.peer, Peer::Viewer))
    }

    /// First page whose identity equals `identity`.
    pub fn find_page(&self, identity: &str) -> Option<&Connection> {
        self.all_pages()
            .find(|(_, page)| page.identity() == Some(identity))
            .map(|(conn, _)| conn)
    }

    /// Removes every connection, returning them so the caller can close them.
    pub fn drain(&mut self) -> Vec<Connection> {
        std::mem::take(&mut self.connections).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn fresh_tag(&self) -> String {
        loop {
            let tag = random_tag(self.tag_len);
            if !self.all_pages().any(|(_, page)| page.disambiguator == tag) {
                return tag;
            }
        }
    }
}

fn random_tag(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}
