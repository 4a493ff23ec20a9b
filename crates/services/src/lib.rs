pub mod lifecycle;
pub mod selection;
pub mod storage;
pub mod template_catalog;
pub mod template_picker;
