//! Handles to objects owned by a module
//!
//! The host may use a foreign object but never frees it: dropping a
//! [`Foreign`] hands the pointer back to the destructor the module supplied.

use crate::binary::ModuleLibrary;
use std::ptr::NonNull;
use std::sync::Arc;

/// A module-created object, destroyed through the module on drop
pub struct Foreign<T> {
    ptr: NonNull<T>,
    destroy: unsafe extern "C" fn(*mut T),
    library: Arc<ModuleLibrary>,
}

impl<T> Foreign<T> {
    /// Take ownership of a raw module object; `None` for null.
    ///
    /// # Safety
    ///
    /// `ptr` must have been created by the module behind `library`, must
    /// begin with a valid `T` header and `destroy` must be the matching
    /// destructor. Ownership passes to the returned handle.
    pub(crate) unsafe fn from_raw(
        ptr: *mut T,
        destroy: unsafe extern "C" fn(*mut T),
        library: Arc<ModuleLibrary>,
    ) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            destroy,
            library,
        })
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// The object header
    pub(crate) fn header(&self) -> &T {
        // Valid until drop, per `from_raw`
        unsafe { self.ptr.as_ref() }
    }

    pub fn library(&self) -> &Arc<ModuleLibrary> {
        &self.library
    }

    pub fn module_name(&self) -> &str {
        self.library.name()
    }

    /// Whether the owning module is still loaded
    pub fn is_live(&self) -> bool {
        self.library.is_active()
    }
}

impl<T> Drop for Foreign<T> {
    fn drop(&mut self) {
        // The library Arc keeps the destructor mapped even after unload
        unsafe { (self.destroy)(self.ptr.as_ptr()) }
    }
}
