//! Role hierarchy checks for moderation commands
//!
//! A [`GuildHierarchy`] is a snapshot of the role positions that matter for a
//! single invocation. The checks themselves are pure so they can be tested
//! without a gateway connection.

use std::collections::HashMap;

use derive_more::Display;
use poise::serenity_prelude::{GuildId, Member, RoleId, UserId};
use thiserror::Error;

use crate::{Context, Error};

/// Member-targeted actions, as they are phrased in refusals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MemberAction {
    #[display("kick this member")]
    Kick,
    #[display("ban this member")]
    Ban,
    #[display("softban this member")]
    Softban,
    #[display("timeout this member")]
    Timeout,
    #[display("change this member's nickname")]
    Nickname,
    #[display("strip this member")]
    Strip,
    #[display("jail this member")]
    Jail,
}

/// Reasons an action is refused before anything is sent to Discord
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("You cannot {0}")]
    InvokerTooLow(MemberAction),

    #[error("I cannot {0}")]
    BotTooLow(MemberAction),

    #[error("You cannot manage this role")]
    RoleAboveInvoker,

    #[error("I cannot manage this role")]
    RoleAboveBot,

    #[error("This member is protected from moderation")]
    Protected,
}

/// Role positions of a guild as seen by one invocation
#[derive(Debug, Clone)]
pub struct GuildHierarchy {
    pub owner_id: UserId,
    pub invoker_id: UserId,
    pub invoker_top: u16,
    pub bot_top: u16,
    positions: HashMap<RoleId, u16>,
}

impl GuildHierarchy {
    pub fn new(
        owner_id: UserId,
        invoker_id: UserId,
        positions: HashMap<RoleId, u16>,
        invoker_roles: &[RoleId],
        bot_roles: &[RoleId],
    ) -> Self {
        let mut hierarchy = Self {
            owner_id,
            invoker_id,
            invoker_top: 0,
            bot_top: 0,
            positions,
        };
        hierarchy.invoker_top = hierarchy.top_position(invoker_roles);
        hierarchy.bot_top = hierarchy.top_position(bot_roles);
        hierarchy
    }

    /// Snapshot the hierarchy for the invoking member and the bot
    ///
    /// # Errors
    /// Fails outside a guild, or when the invoker or the bot cannot be
    /// resolved as members.
    pub async fn load(ctx: Context<'_>) -> Result<Self, Error> {
        let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;
        let invoker_roles = ctx
            .author_member()
            .await
            .ok_or("Could not resolve the invoking member")?
            .roles
            .clone();
        let bot_roles = guild_id
            .member(ctx, ctx.framework().bot_id)
            .await?
            .roles
            .clone();

        let (owner_id, positions) = {
            let guild = ctx.guild().ok_or("Server is not cached")?;
            let positions = guild
                .roles
                .iter()
                .map(|(id, role)| (*id, role.position))
                .collect();
            (guild.owner_id, positions)
        };

        Ok(Self::new(
            owner_id,
            ctx.author().id,
            positions,
            &invoker_roles,
            &bot_roles,
        ))
    }

    /// Highest position among `roles`; members with no roles sit at 0
    #[must_use]
    pub fn top_position(&self, roles: &[RoleId]) -> u16 {
        roles
            .iter()
            .filter_map(|role| self.positions.get(role))
            .copied()
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn role_position(&self, role: RoleId) -> u16 {
        self.positions.get(&role).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn invoker_is_owner(&self) -> bool {
        self.invoker_id == self.owner_id
    }

    /// Check that both the invoker and the bot outrank a member
    ///
    /// # Errors
    /// Returns the refusal naming whichever side is too low.
    pub fn check_member(
        &self,
        target_roles: &[RoleId],
        action: MemberAction,
    ) -> Result<(), HierarchyError> {
        let target_top = self.top_position(target_roles);
        if target_top >= self.invoker_top && !self.invoker_is_owner() {
            return Err(HierarchyError::InvokerTooLow(action));
        }
        if target_top >= self.bot_top {
            return Err(HierarchyError::BotTooLow(action));
        }
        Ok(())
    }

    /// Check that a role can be handed out or taken away
    ///
    /// # Errors
    /// Returns the refusal naming whichever side is too low.
    pub fn check_role(&self, role: RoleId) -> Result<(), HierarchyError> {
        let position = self.role_position(role);
        if position >= self.bot_top {
            return Err(HierarchyError::RoleAboveBot);
        }
        if position >= self.invoker_top && !self.invoker_is_owner() {
            return Err(HierarchyError::RoleAboveInvoker);
        }
        Ok(())
    }

    /// The subset of `roles` sitting below the bot's top role
    #[must_use]
    pub fn manageable(&self, roles: &[RoleId]) -> Vec<RoleId> {
        roles
            .iter()
            .copied()
            .filter(|role| self.role_position(*role) < self.bot_top)
            .collect()
    }
}

/// Check that the invoker and the bot both outrank `target`
///
/// # Errors
/// Returns a platform error if the hierarchy cannot be loaded.
pub async fn check_target(
    ctx: Context<'_>,
    target: &Member,
    action: MemberAction,
) -> Result<Result<(), HierarchyError>, Error> {
    let hierarchy = GuildHierarchy::load(ctx).await?;
    Ok(hierarchy.check_member(&target.roles, action))
}

/// Hierarchy check plus the protected-member check
///
/// # Errors
/// Returns a platform error if the hierarchy cannot be loaded.
pub async fn authorize(
    ctx: Context<'_>,
    guild_id: GuildId,
    target: &Member,
    action: MemberAction,
) -> Result<Result<(), HierarchyError>, Error> {
    if let Err(refusal) = check_target(ctx, target, action).await? {
        return Ok(Err(refusal));
    }
    Ok(ensure_unprotected(ctx, guild_id, target.user.id.get()).await)
}

/// Refuse protected members; without persistence nobody is protected
pub async fn ensure_unprotected(
    ctx: Context<'_>,
    guild_id: GuildId,
    user_id: u64,
) -> Result<(), HierarchyError> {
    if ctx.data().is_protected(guild_id, user_id).await {
        return Err(HierarchyError::Protected);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: UserId = UserId::new(1);
    const MODERATOR: UserId = UserId::new(2);
    const LOW: RoleId = RoleId::new(10);
    const MID: RoleId = RoleId::new(20);
    const HIGH: RoleId = RoleId::new(30);
    const BOT: RoleId = RoleId::new(40);

    fn positions() -> HashMap<RoleId, u16> {
        HashMap::from([(LOW, 1), (MID, 2), (HIGH, 3), (BOT, 4)])
    }

    fn as_moderator(invoker_roles: &[RoleId]) -> GuildHierarchy {
        GuildHierarchy::new(OWNER, MODERATOR, positions(), invoker_roles, &[BOT])
    }

    #[test]
    fn test_member_below_both_is_allowed() {
        let hierarchy = as_moderator(&[MID]);
        assert_eq!(hierarchy.check_member(&[LOW], MemberAction::Kick), Ok(()));
    }

    #[test]
    fn test_equal_rank_is_refused() {
        let hierarchy = as_moderator(&[MID]);
        assert_eq!(
            hierarchy.check_member(&[MID, LOW], MemberAction::Ban),
            Err(HierarchyError::InvokerTooLow(MemberAction::Ban))
        );
        assert_eq!(
            HierarchyError::InvokerTooLow(MemberAction::Ban).to_string(),
            "You cannot ban this member"
        );
    }

    #[test]
    fn test_owner_bypasses_invoker_check_but_not_bot_check() {
        let hierarchy = GuildHierarchy::new(OWNER, OWNER, positions(), &[], &[BOT]);
        assert_eq!(hierarchy.check_member(&[HIGH], MemberAction::Timeout), Ok(()));

        let hierarchy = GuildHierarchy::new(OWNER, OWNER, positions(), &[], &[MID]);
        let refusal = hierarchy
            .check_member(&[HIGH], MemberAction::Nickname)
            .unwrap_err();
        assert_eq!(refusal.to_string(), "I cannot change this member's nickname");
    }

    #[test]
    fn test_members_without_roles_sit_at_the_bottom() {
        let hierarchy = as_moderator(&[]);
        assert_eq!(hierarchy.invoker_top, 0);
        assert_eq!(
            hierarchy.check_member(&[], MemberAction::Kick),
            Err(HierarchyError::InvokerTooLow(MemberAction::Kick))
        );
    }

    #[test]
    fn test_role_checks() {
        let hierarchy = as_moderator(&[HIGH]);
        assert_eq!(hierarchy.check_role(MID), Ok(()));
        assert_eq!(hierarchy.check_role(BOT), Err(HierarchyError::RoleAboveBot));
        assert_eq!(hierarchy.check_role(HIGH), Err(HierarchyError::RoleAboveInvoker));
        assert_eq!(
            HierarchyError::RoleAboveBot.to_string(),
            "I cannot manage this role"
        );
    }

    #[test]
    fn test_manageable_roles() {
        let hierarchy = GuildHierarchy::new(OWNER, OWNER, positions(), &[], &[HIGH]);
        assert_eq!(hierarchy.manageable(&[LOW, MID, HIGH, BOT]), vec![LOW, MID]);
    }
}
