//! Access gate. Every read and mutation passes through here before any
//! query compilation happens. Denials are always `Forbidden`; rows that do
//! not exist are always `NotFound`; the two are never conflated.

use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::Role;
use crate::error::{AppError, AppResult};
use crate::models::{Project, WorkItem};
use crate::schema::{project_members, projects, work_items, workspace_members};

#[derive(Debug, Clone, Copy)]
pub struct Requester {
    pub user_id: Uuid,
}

/// Resolved membership of one requester against one project, loaded once
/// per request and consulted by every subsequent policy check.
#[derive(Debug, Clone)]
pub struct ProjectAccess {
    pub project: Project,
    pub workspace_role: Option<Role>,
    pub project_role: Option<Role>,
    pub requester: Requester,
}

pub fn load_project_access(
    conn: &mut PgConnection,
    requester: Requester,
    project_id: Uuid,
) -> AppResult<ProjectAccess> {
    let project: Project = projects::table
        .find(project_id)
        .filter(projects::archived_at.is_null())
        .first(conn)?;

    let workspace_role: Option<i16> = workspace_members::table
        .filter(workspace_members::workspace_id.eq(project.workspace_id))
        .filter(workspace_members::user_id.eq(requester.user_id))
        .filter(workspace_members::is_active.eq(true))
        .select(workspace_members::role)
        .first(conn)
        .optional()?;

    let project_role: Option<i16> = project_members::table
        .filter(project_members::project_id.eq(project.id))
        .filter(project_members::user_id.eq(requester.user_id))
        .filter(project_members::is_active.eq(true))
        .select(project_members::role)
        .first(conn)
        .optional()?;

    Ok(ProjectAccess {
        project,
        workspace_role: workspace_role.and_then(Role::from_i16),
        project_role: project_role.and_then(Role::from_i16),
        requester,
    })
}

impl ProjectAccess {
    /// Project membership wins over workspace membership when both exist.
    pub fn effective_role(&self) -> Option<Role> {
        self.project_role.or(self.workspace_role)
    }

    /// Policy 1 + 2: workspace membership is required for any read, project
    /// membership for project-scoped reads, unless a matching public anchor
    /// was presented.
    pub fn require_read(&self, anchor: Option<&str>) -> AppResult<()> {
        if let (Some(presented), Some(published)) = (anchor, self.project.public_anchor.as_deref())
        {
            if presented == published {
                return Ok(());
            }
        }
        if self.workspace_role.is_none() {
            return Err(AppError::forbidden());
        }
        if self.project_role.is_none() {
            return Err(AppError::forbidden());
        }
        Ok(())
    }

    /// Policy 3: a guest on a project without `guest_view_all_features`
    /// only sees rows they created. Returns the `created_by` restriction to
    /// fold into the base predicate; the gate never silently empties a
    /// result set.
    pub fn guest_created_by_restriction(&self) -> Option<Uuid> {
        match self.project_role {
            Some(Role::Guest) if !self.project.guest_view_all_features => {
                Some(self.requester.user_id)
            }
            _ => None,
        }
    }

    /// Policy 3 applied to one row that is known to exist: a scoped guest
    /// is denied, not told it is missing. Sub-resource reads (activities,
    /// comments, links, attachments) go through this before touching
    /// anything hanging off the item.
    pub fn require_item_visible(&self, created_by: Uuid) -> AppResult<()> {
        match self.guest_created_by_restriction() {
            Some(creator) if created_by != creator => Err(AppError::forbidden()),
            _ => Ok(()),
        }
    }

    /// Policy 4: general mutations need Member or better.
    pub fn require_mutation(&self) -> AppResult<()> {
        self.require_read(None)?;
        match self.effective_role() {
            Some(role) if role >= Role::Member => Ok(()),
            Some(_) => Err(AppError::forbidden()),
            None => Err(AppError::forbidden()),
        }
    }

    /// Policy 4 carve-out: anyone with read access may create and edit
    /// their own comments and reactions.
    pub fn require_self_mutation(&self, owner_id: Uuid) -> AppResult<()> {
        self.require_read(None)?;
        if owner_id == self.requester.user_id {
            return Ok(());
        }
        self.require_mutation()
    }

    /// Policy 5: deleting a work item needs Admin or being its creator.
    pub fn require_delete(&self, created_by: Uuid) -> AppResult<()> {
        self.require_read(None)?;
        if created_by == self.requester.user_id {
            return Ok(());
        }
        match self.effective_role() {
            Some(Role::Admin) => Ok(()),
            _ => Err(AppError::forbidden()),
        }
    }
}

/// Loads a live work item in the gated project and applies the guest
/// visibility restriction. Every handler that reads or writes through an
/// item uses this instead of a bare existence check.
pub fn load_visible_item(
    conn: &mut PgConnection,
    gate: &ProjectAccess,
    work_item_id: Uuid,
) -> AppResult<WorkItem> {
    let item: WorkItem = work_items::table
        .find(work_item_id)
        .filter(work_items::project_id.eq(gate.project.id))
        .filter(work_items::deleted_at.is_null())
        .first(conn)?;
    gate.require_item_visible(item.created_by)?;
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn project(guest_view_all: bool, anchor: Option<&str>) -> Project {
        Project {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            name: "Test".into(),
            identifier: "TST".into(),
            guest_view_all_features: guest_view_all,
            public_anchor: anchor.map(|a| a.to_string()),
            default_assignee_id: None,
            last_sequence: 0,
            archived_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn access(
        project: Project,
        workspace_role: Option<Role>,
        project_role: Option<Role>,
    ) -> ProjectAccess {
        ProjectAccess {
            project,
            workspace_role,
            project_role,
            requester: Requester {
                user_id: Uuid::new_v4(),
            },
        }
    }

    #[test]
    fn read_requires_both_memberships() {
        let gate = access(project(true, None), None, None);
        assert_eq!(
            gate.require_read(None).unwrap_err().kind(),
            crate::error::ErrorKind::Forbidden
        );

        let gate = access(project(true, None), Some(Role::Member), None);
        assert!(gate.require_read(None).is_err());

        let gate = access(project(true, None), Some(Role::Member), Some(Role::Viewer));
        assert!(gate.require_read(None).is_ok());
    }

    #[test]
    fn matching_anchor_grants_public_read() {
        let gate = access(project(true, Some("anchor-1")), None, None);
        assert!(gate.require_read(Some("anchor-1")).is_ok());
        assert!(gate.require_read(Some("wrong")).is_err());
    }

    #[test]
    fn guest_without_view_all_is_scoped_to_own_rows() {
        let gate = access(project(false, None), Some(Role::Guest), Some(Role::Guest));
        assert_eq!(
            gate.guest_created_by_restriction(),
            Some(gate.requester.user_id)
        );

        let gate = access(project(true, None), Some(Role::Guest), Some(Role::Guest));
        assert_eq!(gate.guest_created_by_restriction(), None);
    }

    #[test]
    fn scoped_guest_cannot_see_other_creators_items() {
        let gate = access(project(false, None), Some(Role::Guest), Some(Role::Guest));
        assert_eq!(
            gate.require_item_visible(Uuid::new_v4()).unwrap_err().kind(),
            crate::error::ErrorKind::Forbidden
        );
        assert!(gate.require_item_visible(gate.requester.user_id).is_ok());
    }

    #[test]
    fn item_visibility_is_unrestricted_outside_the_guest_scope() {
        let gate = access(project(true, None), Some(Role::Guest), Some(Role::Guest));
        assert!(gate.require_item_visible(Uuid::new_v4()).is_ok());

        let gate = access(project(false, None), Some(Role::Member), Some(Role::Member));
        assert!(gate.require_item_visible(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn viewer_cannot_mutate_but_member_can() {
        let gate = access(project(true, None), Some(Role::Viewer), Some(Role::Viewer));
        assert!(gate.require_mutation().is_err());

        let gate = access(project(true, None), Some(Role::Member), Some(Role::Member));
        assert!(gate.require_mutation().is_ok());
    }

    #[test]
    fn delete_needs_admin_or_creator() {
        let gate = access(project(true, None), Some(Role::Member), Some(Role::Member));
        let stranger = Uuid::new_v4();
        assert!(gate.require_delete(stranger).is_err());
        assert!(gate.require_delete(gate.requester.user_id).is_ok());

        let gate = access(project(true, None), Some(Role::Admin), Some(Role::Admin));
        assert!(gate.require_delete(stranger).is_ok());
    }

    #[test]
    fn self_owned_comment_edit_allowed_for_guests() {
        let gate = access(project(true, None), Some(Role::Guest), Some(Role::Guest));
        assert!(gate.require_self_mutation(gate.requester.user_id).is_ok());
        assert!(gate.require_self_mutation(Uuid::new_v4()).is_err());
    }
}
