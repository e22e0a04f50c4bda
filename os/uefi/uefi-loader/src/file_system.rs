use core::cell::RefCell;
use uefi::boot::{self, ScopedProtocol};
use uefi::proto::media::file::{self, File, FileAttribute, FileInfo, FileMode, RegularFile};
use uefi::proto::media::fs::SimpleFileSystem;
use uefi::{CString16, Status};
use uefi_handoff::image::{Directory, FileVolume, ReadOnlyFile};

/// The file system of the volume the loader was started from.
pub struct BootVolume {
    fs: RefCell<ScopedProtocol<SimpleFileSystem>>,
}

impl BootVolume {
    pub fn open() -> Result<Self, Status> {
        let fs = boot::get_image_file_system(boot::image_handle()).map_err(|e| e.status())?;
        Ok(Self {
            fs: RefCell::new(fs),
        })
    }
}

impl FileVolume for BootVolume {
    type Root = RootDirectory;

    fn open_volume(&self) -> Result<Self::Root, Status> {
        let mut fs = self.fs.try_borrow_mut().map_err(|_| Status::ACCESS_DENIED)?;
        let dir = fs.open_volume().map_err(|e| e.status())?;
        Ok(RootDirectory(dir))
    }
}

pub struct RootDirectory(file::Directory);

impl Directory for RootDirectory {
    type File = ImageFile;

    fn open_read_only(&mut self, path: &str) -> Result<Self::File, Status> {
        let path = CString16::try_from(path).map_err(|_| Status::INVALID_PARAMETER)?;
        let handle = self
            .0
            .open(&path, FileMode::Read, FileAttribute::empty())
            .map_err(|e| e.status())?;

        handle
            .into_regular_file()
            .map(ImageFile)
            .ok_or(Status::UNSUPPORTED)
    }
}

pub struct ImageFile(RegularFile);

impl ReadOnlyFile for ImageFile {
    fn file_size(&mut self) -> Result<u64, Status> {
        let info = self
            .0
            .get_boxed_info::<FileInfo>()
            .map_err(|e| e.status())?;
        Ok(info.file_size())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Status> {
        self.0.read(buffer).map_err(|e| e.status())
    }
}
