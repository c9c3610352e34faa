//! Stage access and presenter context
//!
//! The pipeline used to be reached through application globals; instead,
//! everything it needs from the outside world — stage object ordering,
//! user-facing notices, the settings store — is injected once through a
//! [`PresenterContext`].

use std::cell::RefCell;
use std::rc::Rc;

use uuid::Uuid;

use crate::geometry::Size;
use crate::settings::SettingsStore;

/// Identifier of an object placed on the stage.
pub type StageObjectId = Uuid;

/// Stage size used before a real stage reports one.
pub const DEFAULT_STAGE_SIZE: Size = Size {
    width: 1920.0,
    height: 1080.0,
};

/// Read access to the stage the presenter is placed on.
pub trait StageAccessor {
    fn size(&self) -> Size;

    /// All stage objects ordered back to front.
    fn ordered_objects(&self) -> Vec<StageObjectId>;
}

/// A user-facing message raised by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub title: String,
    pub body: String,
}

/// Receiver for user-facing notices (alert views, toasts).
pub trait NoticeSink {
    fn notify(&self, notice: Notice);
}

/// Everything the presenter needs from the embedding application.
#[derive(Clone)]
pub struct PresenterContext {
    pub stage: Rc<dyn StageAccessor>,
    pub notices: Rc<dyn NoticeSink>,
    pub settings: Rc<RefCell<dyn SettingsStore>>,
}

impl PresenterContext {
    pub fn new(
        stage: Rc<dyn StageAccessor>,
        notices: Rc<dyn NoticeSink>,
        settings: Rc<RefCell<dyn SettingsStore>>,
    ) -> Self {
        Self {
            stage,
            notices,
            settings,
        }
    }
}
