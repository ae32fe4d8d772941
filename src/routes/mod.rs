/// Router Module Index
///
/// Routes are split by who can reach them. The split is for readability only: every
/// request, whichever module defines its route, passes through the security filter and
/// its central permission table first.

/// Login, logout and static assets. Reachable without a session.
pub mod public;

/// The home page and the `/medicos` resource. Require a session; role checks come from
/// the permission table.
pub mod authenticated;
