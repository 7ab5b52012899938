use crate::{
    data::{StudentStore, UserStore},
    notify::Notifier,
    service::StudentService,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct MatriculaState {
    students: StudentService,
    users: Arc<dyn UserStore>,
}

impl MatriculaState {
    /// Both stores are usually the same object, seen through each trait.
    pub fn new<S>(store: Arc<S>, notifier: Notifier) -> Self
    where
        S: StudentStore + UserStore + 'static,
    {
        Self {
            students: StudentService::new(store.clone(), notifier),
            users: store,
        }
    }

    pub const fn students(&self) -> &StudentService {
        &self.students
    }

    pub fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }
}
