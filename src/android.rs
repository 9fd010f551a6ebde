//! JNI calls into the hosting activity.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use jni::{
    objects::{JObject, JString, JValueGen},
    sys::{JNIInvokeInterface_, _jobject, jint},
    JNIEnv, JavaVM,
};
use log::info;
use slint::android::AndroidApp;

use crate::permission::PermissionGate;

pub const CAMERA_PERMISSION: &str = "android.permission.CAMERA";
pub const STORAGE_PERMISSION: &str = "android.permission.WRITE_EXTERNAL_STORAGE";
const CAMERA_PERMISSION_REQUEST_CODE: i32 = 100;

/// Scoped storage makes the storage permission unnecessary past Android 9.
const LAST_SDK_NEEDING_STORAGE_PERMISSION: i32 = 28;

fn with_env<T>(app: &AndroidApp, f: impl FnOnce(&mut JNIEnv, JObject<'static>) -> Result<T>) -> Result<T> {
    unsafe {
        let vm = JavaVM::from_raw(app.vm_as_ptr() as *mut *const JNIInvokeInterface_)?;
        let mut env = vm.attach_current_thread()?;
        let activity = JObject::from_raw(app.activity_as_ptr() as *mut _jobject);
        f(&mut env, activity)
    }
}

pub fn sdk_version(app: &AndroidApp) -> Result<i32> {
    with_env(app, |env, _| {
        Ok(env
            .get_static_field("android/os/Build$VERSION", "SDK_INT", "I")?
            .i()?)
    })
}

pub fn check_self_permission(app: &AndroidApp, permission: &str) -> Result<bool> {
    with_env(app, |env, activity| {
        let granted_int = env
            .get_static_field(
                "android/content/pm/PackageManager",
                "PERMISSION_GRANTED",
                "I",
            )?
            .i()?;
        let permission_str = env.new_string(permission)?;
        let result = env
            .call_method(
                activity,
                "checkSelfPermission",
                "(Ljava/lang/String;)I",
                &[JValueGen::Object(&JObject::from(permission_str))],
            )?
            .i()?;
        Ok(result == granted_int)
    })
}

pub fn request_permissions(app: &AndroidApp, permissions: &[&str], request_code: i32) -> Result<()> {
    with_env(app, |env, activity| {
        let java_permission_array =
            env.new_object_array(permissions.len() as jint, "java/lang/String", JObject::null())?;
        for (index, permission) in permissions.iter().enumerate() {
            let permission_str = env.new_string(*permission)?;
            env.set_object_array_element(&java_permission_array, index as jint, permission_str)?;
        }
        env.call_method(
            activity,
            "requestPermissions",
            "([Ljava/lang/String;I)V",
            &[
                JValueGen::Object(&JObject::from(java_permission_array)),
                request_code.into(),
            ],
        )?;
        Ok(())
    })
}

/// `Environment.getExternalStoragePublicDirectory(Environment.DIRECTORY_PICTURES)`.
pub fn pictures_dir(app: &AndroidApp) -> Result<PathBuf> {
    with_env(app, |env, _| {
        let environment = "android/os/Environment";
        let dir_name = env
            .get_static_field(environment, "DIRECTORY_PICTURES", "Ljava/lang/String;")?
            .l()?;
        let file = env
            .call_static_method(
                environment,
                "getExternalStoragePublicDirectory",
                "(Ljava/lang/String;)Ljava/io/File;",
                &[JValueGen::Object(&dir_name)],
            )?
            .l()?;
        if file.is_null() {
            return Err(anyhow!("pictures directory is unavailable"));
        }
        let path = env
            .call_method(&file, "getAbsolutePath", "()Ljava/lang/String;", &[])?
            .l()?;
        let path: JString = path.into();
        let path: String = env.get_string(&path)?.into();
        Ok(PathBuf::from(path))
    })
}

/// Camera (and, on old releases, storage) permission of the hosting activity.
pub struct AndroidPermissions {
    app: AndroidApp,
}

impl AndroidPermissions {
    pub fn new(app: AndroidApp) -> Self {
        Self { app }
    }

    fn required(&self) -> Result<Vec<&'static str>> {
        let sdk_version = sdk_version(&self.app)?;
        let mut permissions = vec![CAMERA_PERMISSION];
        if sdk_version <= LAST_SDK_NEEDING_STORAGE_PERMISSION {
            permissions.push(STORAGE_PERMISSION);
        }
        Ok(permissions)
    }
}

impl PermissionGate for AndroidPermissions {
    fn is_granted(&self) -> Result<bool> {
        // runtime permissions arrived with Marshmallow
        if sdk_version(&self.app)? < 23 {
            return Ok(true);
        }
        for permission in self.required()? {
            if !check_self_permission(&self.app, permission)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn request(&self) -> Result<()> {
        let permissions = self.required()?;
        info!("requesting permissions: {permissions:?}");
        request_permissions(&self.app, &permissions, CAMERA_PERMISSION_REQUEST_CODE)
    }
}
