use crate::domain::models::{EventKind, QueryGroup, QueryGroupSet, RealtimeEvent};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::query_cache::QueryCache;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub const DEFAULT_INVALIDATION_BUFFER_CAPACITY: usize = 64;

/// Every client-side mutation the app performs. Pure reads are not listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    TaskCreate,
    TaskUpdate,
    TaskDelete,
    TaskToggleCompletion,
    TaskReorder,
    SubtaskCreate,
    SubtaskUpdate,
    SubtaskDelete,
    SubtaskToggle,
    HabitCreate,
    HabitUpdate,
    HabitDelete,
    HabitToggleCompletion,
    BoardCreate,
    BoardUpdate,
    BoardDelete,
    ColumnCreate,
    ColumnUpdate,
    ColumnDelete,
    ColumnReorder,
    InboxCapture,
    InboxProcess,
    InboxDelete,
    ReminderCreate,
    ReminderDismiss,
    PomodoroStart,
    PomodoroPause,
    PomodoroComplete,
    ExecuteCommand,
}

impl MutationKind {
    pub const ALL: [MutationKind; 29] = [
        Self::TaskCreate,
        Self::TaskUpdate,
        Self::TaskDelete,
        Self::TaskToggleCompletion,
        Self::TaskReorder,
        Self::SubtaskCreate,
        Self::SubtaskUpdate,
        Self::SubtaskDelete,
        Self::SubtaskToggle,
        Self::HabitCreate,
        Self::HabitUpdate,
        Self::HabitDelete,
        Self::HabitToggleCompletion,
        Self::BoardCreate,
        Self::BoardUpdate,
        Self::BoardDelete,
        Self::ColumnCreate,
        Self::ColumnUpdate,
        Self::ColumnDelete,
        Self::ColumnReorder,
        Self::InboxCapture,
        Self::InboxProcess,
        Self::InboxDelete,
        Self::ReminderCreate,
        Self::ReminderDismiss,
        Self::PomodoroStart,
        Self::PomodoroPause,
        Self::PomodoroComplete,
        Self::ExecuteCommand,
    ];

    pub fn invalidated_groups(self) -> &'static [QueryGroup] {
        use QueryGroup::*;
        match self {
            Self::TaskCreate
            | Self::TaskUpdate
            | Self::TaskDelete
            | Self::TaskToggleCompletion
            | Self::TaskReorder
            | Self::SubtaskCreate
            | Self::SubtaskUpdate
            | Self::SubtaskDelete
            | Self::SubtaskToggle => &[Tasks, Agenda],
            Self::HabitCreate
            | Self::HabitUpdate
            | Self::HabitDelete
            | Self::HabitToggleCompletion => &[Habits, Agenda],
            Self::BoardCreate | Self::BoardUpdate => &[Boards],
            // Deleting a board drops its columns and their tasks.
            Self::BoardDelete
            | Self::ColumnCreate
            | Self::ColumnUpdate
            | Self::ColumnDelete
            | Self::ColumnReorder => &[Boards, Tasks, Agenda],
            Self::InboxCapture | Self::InboxDelete => &[Inbox],
            Self::InboxProcess => &[Inbox, Tasks, Agenda],
            Self::ReminderCreate | Self::ReminderDismiss => &[Reminders],
            Self::PomodoroStart | Self::PomodoroPause | Self::PomodoroComplete => &[Pomodoro],
            Self::ExecuteCommand => &[Agenda, Tasks, Habits, Boards],
        }
    }

    /// The realtime kind the server pushes for this mutation, if any.
    pub fn subject(self) -> Option<EventKind> {
        match self {
            Self::TaskCreate
            | Self::TaskUpdate
            | Self::TaskDelete
            | Self::TaskToggleCompletion
            | Self::TaskReorder => Some(EventKind::Task),
            Self::SubtaskCreate
            | Self::SubtaskUpdate
            | Self::SubtaskDelete
            | Self::SubtaskToggle => Some(EventKind::Subtask),
            Self::BoardCreate | Self::BoardUpdate | Self::BoardDelete => Some(EventKind::Board),
            Self::ColumnCreate | Self::ColumnUpdate | Self::ColumnDelete | Self::ColumnReorder => {
                Some(EventKind::Column)
            }
            Self::InboxCapture | Self::InboxProcess | Self::InboxDelete => Some(EventKind::Inbox),
            Self::ReminderCreate | Self::ReminderDismiss => Some(EventKind::Reminder),
            Self::PomodoroStart | Self::PomodoroPause | Self::PomodoroComplete => {
                Some(EventKind::Pomodoro)
            }
            Self::HabitCreate
            | Self::HabitUpdate
            | Self::HabitDelete
            | Self::HabitToggleCompletion
            | Self::ExecuteCommand => None,
        }
    }

    pub fn group_set(self) -> QueryGroupSet {
        self.invalidated_groups().iter().copied().collect()
    }
}

/// Groups a pushed event invalidates: the union over every mutation of the
/// same subject, so a remote change never refreshes less than the local one.
pub fn groups_for_event_kind(kind: EventKind) -> QueryGroupSet {
    MutationKind::ALL
        .into_iter()
        .filter(|mutation| mutation.subject() == Some(kind))
        .flat_map(|mutation| mutation.invalidated_groups().iter().copied())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationOrigin {
    Mutation(MutationKind),
    Realtime(EventKind),
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub groups: QueryGroupSet,
    pub origin: InvalidationOrigin,
}

pub struct CacheInvalidationRouter<Q>
where
    Q: QueryCache,
{
    cache: Arc<Q>,
    sender: broadcast::Sender<Invalidation>,
}

impl<Q> CacheInvalidationRouter<Q>
where
    Q: QueryCache,
{
    pub fn new(cache: Arc<Q>) -> Self {
        let (sender, _receiver) = broadcast::channel(DEFAULT_INVALIDATION_BUFFER_CAPACITY);
        Self { cache, sender }
    }

    pub fn cache(&self) -> &Arc<Q> {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.sender.subscribe()
    }

    pub fn invalidate(&self, groups: QueryGroupSet) -> Result<(), InfraError> {
        self.publish(Invalidation {
            groups,
            origin: InvalidationOrigin::Manual,
        })
    }

    pub fn invalidate_for_mutation(&self, kind: MutationKind) -> Result<QueryGroupSet, InfraError> {
        let groups = kind.group_set();
        self.publish(Invalidation {
            groups: groups.clone(),
            origin: InvalidationOrigin::Mutation(kind),
        })?;
        Ok(groups)
    }

    pub fn invalidate_for_event(&self, event: &RealtimeEvent) -> Result<QueryGroupSet, InfraError> {
        let groups = groups_for_event_kind(event.kind);
        debug!(
            kind = event.kind.as_str(),
            action = event.action.as_str(),
            "routing realtime event"
        );
        self.publish(Invalidation {
            groups: groups.clone(),
            origin: InvalidationOrigin::Realtime(event.kind),
        })?;
        Ok(groups)
    }

    fn publish(&self, invalidation: Invalidation) -> Result<(), InfraError> {
        for group in &invalidation.groups {
            self.cache.mark_stale(*group)?;
        }
        info!(
            groups = ?invalidation.groups,
            origin = ?invalidation.origin,
            "query groups invalidated"
        );
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(invalidation);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::EventAction;
    use crate::infrastructure::query_cache::InMemoryQueryCache;
    use std::collections::BTreeMap;

    fn groups(items: &[QueryGroup]) -> QueryGroupSet {
        items.iter().copied().collect()
    }

    #[test]
    fn every_mutation_invalidates_something() {
        for kind in MutationKind::ALL {
            assert!(!kind.invalidated_groups().is_empty(), "{kind:?} invalidates nothing");
        }
    }

    #[test]
    fn every_event_kind_maps_to_groups() {
        for kind in EventKind::ALL {
            assert!(!groups_for_event_kind(kind).is_empty(), "{kind:?} routes nowhere");
        }
    }

    #[test]
    fn each_mutation_marks_exactly_its_groups() {
        for kind in MutationKind::ALL {
            let router = CacheInvalidationRouter::new(Arc::new(InMemoryQueryCache::default()));
            router.invalidate_for_mutation(kind).expect("invalidate");
            assert_eq!(
                router.cache().stale_groups().expect("stale groups"),
                kind.group_set(),
                "{kind:?}"
            );
        }
    }

    #[test]
    fn declared_mapping_matches_documented_examples() {
        use QueryGroup::*;
        assert_eq!(MutationKind::TaskCreate.group_set(), groups(&[Tasks, Agenda]));
        assert_eq!(MutationKind::TaskToggleCompletion.group_set(), groups(&[Tasks, Agenda]));
        assert_eq!(MutationKind::HabitToggleCompletion.group_set(), groups(&[Habits, Agenda]));
        assert_eq!(
            MutationKind::ExecuteCommand.group_set(),
            groups(&[Agenda, Tasks, Habits, Boards])
        );
        assert_eq!(MutationKind::InboxCapture.group_set(), groups(&[Inbox]));
    }

    #[test]
    fn event_never_invalidates_less_than_its_mutations() {
        for kind in MutationKind::ALL {
            if let Some(subject) = kind.subject() {
                assert!(
                    kind.group_set().is_subset(&groups_for_event_kind(subject)),
                    "{kind:?}"
                );
            }
        }
    }

    #[test]
    fn task_update_event_matches_local_task_update() {
        let router = CacheInvalidationRouter::new(Arc::new(InMemoryQueryCache::default()));
        let event = RealtimeEvent {
            kind: EventKind::Task,
            action: EventAction::Updated,
            subject_ids: BTreeMap::from([("taskId".to_string(), "t1".to_string())]),
        };
        let from_event = router.invalidate_for_event(&event).expect("route event");
        assert_eq!(from_event, MutationKind::TaskUpdate.group_set());
        assert_eq!(
            router.cache().stale_groups().expect("stale groups"),
            groups(&[QueryGroup::Tasks, QueryGroup::Agenda])
        );
    }

    #[test]
    fn subscribers_receive_invalidation_notices() {
        let router = CacheInvalidationRouter::new(Arc::new(InMemoryQueryCache::default()));
        let mut notices = router.subscribe();
        router
            .invalidate_for_mutation(MutationKind::PomodoroStart)
            .expect("invalidate");

        let notice = notices.try_recv().expect("notice published");
        assert_eq!(notice.groups, groups(&[QueryGroup::Pomodoro]));
        assert_eq!(
            notice.origin,
            InvalidationOrigin::Mutation(MutationKind::PomodoroStart)
        );
    }

    #[test]
    fn repeated_invalidation_is_idempotent() {
        let router = CacheInvalidationRouter::new(Arc::new(InMemoryQueryCache::default()));
        router
            .invalidate(groups(&[QueryGroup::Boards]))
            .expect("first");
        router
            .invalidate(groups(&[QueryGroup::Boards]))
            .expect("second");
        assert_eq!(
            router.cache().stale_groups().expect("stale groups"),
            groups(&[QueryGroup::Boards])
        );
    }
}
