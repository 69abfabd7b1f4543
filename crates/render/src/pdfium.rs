//! PDFium raster backend
//!
//! PDFium is not thread-safe, so every PDFium object lives on one owner
//! thread that is started, and binds the library, once per process. The
//! documents and pages handed out here only hold ids; each call is a message
//! to the owner thread and blocks on its reply.

use pdfium_render::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::OnceLock;
use std::thread;

use crate::backend::{ByteSource, ClipRect, PageSize, RasterBackend, RasterDocument, RasterPage};
use crate::bitmap::PixelBuffer;
use crate::{RenderError, RenderResult};

/// Background color pages are erased to before drawing
const PAPER_WHITE: [u8; 4] = [255, 255, 255, 255];

const OWNER_GONE: &str = "PDFium owner thread stopped";

type Reply<T> = Sender<RenderResult<T>>;

type DocumentId = u64;
type PageId = u64;

/// RGBA pixels produced by the owner thread
struct RenderedPage {
    pixels: Vec<u8>,
    width: usize,
    height: usize,
}

enum Command {
    Open {
        source: ByteSource,
        reply: Reply<(DocumentId, usize)>,
    },
    OpenPage {
        document: DocumentId,
        index: usize,
        reply: Reply<(PageId, PageSize)>,
    },
    Render {
        page: PageId,
        width: u32,
        height: u32,
        reply: Reply<RenderedPage>,
    },
    ClosePage {
        page: PageId,
    },
    CloseDocument {
        document: DocumentId,
    },
}

/// Sending side of the owner thread's mailbox
#[derive(Clone)]
struct Owner {
    commands: Sender<Command>,
}

impl Owner {
    /// The process-wide owner, started on first use
    fn get() -> RenderResult<Self> {
        static OWNER: OnceLock<Result<Sender<Command>, String>> = OnceLock::new();
        match OWNER.get_or_init(spawn_owner) {
            Ok(commands) => Ok(Self {
                commands: commands.clone(),
            }),
            Err(reason) => Err(RenderError::OpenFailed(format!("PDFium unavailable: {reason}"))),
        }
    }

    /// Send a request and wait for its reply
    ///
    /// `None` means the owner thread is gone.
    fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Option<RenderResult<T>> {
        let (reply, response) = mpsc::channel();
        self.commands.send(command(reply)).ok()?;
        response.recv().ok()
    }

    /// Fire-and-forget release; a dead owner has nothing left to release
    fn notify(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("{OWNER_GONE}, release skipped");
        }
    }
}

fn spawn_owner() -> Result<Sender<Command>, String> {
    let (commands, inbox) = mpsc::channel();
    let (ready, bound) = mpsc::channel();

    thread::Builder::new()
        .name("pdf-viewer-pdfium".to_string())
        .spawn(move || {
            let pdfium = match bind_library() {
                Ok(bindings) => Pdfium::new(bindings),
                Err(e) => {
                    let _ = ready.send(Err(e.to_string()));
                    return;
                }
            };
            let _ = ready.send(Ok(()));
            OwnerThread::new(&pdfium).run(inbox);
        })
        .map_err(|e| e.to_string())?;

    bound.recv().map_err(|_| OWNER_GONE.to_string())??;
    tracing::debug!("PDFium bound");
    Ok(commands)
}

/// Bind to the PDFium library
///
/// Search order:
/// 1. Executable's directory
/// 2. Current working directory
/// 3. System library paths
fn bind_library() -> Result<Box<dyn PdfiumLibraryBindings>, PdfiumError> {
    let exe_dir: Option<PathBuf> = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()));

    exe_dir
        .and_then(|dir| Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)).ok())
        .map(Ok)
        .unwrap_or_else(|| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library())
        })
}

/// State owned by the PDFium thread
///
/// `pages` is declared first so open pages drop before their documents.
struct OwnerThread<'a> {
    pages: HashMap<PageId, (DocumentId, usize, PdfPage<'a>)>,
    documents: HashMap<DocumentId, PdfDocument<'a>>,
    pdfium: &'a Pdfium,
    next_id: u64,
}

impl<'a> OwnerThread<'a> {
    fn new(pdfium: &'a Pdfium) -> Self {
        Self {
            pages: HashMap::new(),
            documents: HashMap::new(),
            pdfium,
            next_id: 1,
        }
    }

    fn run(mut self, inbox: Receiver<Command>) {
        for command in inbox {
            match command {
                Command::Open { source, reply } => {
                    let _ = reply.send(self.open(&source));
                }
                Command::OpenPage { document, index, reply } => {
                    let _ = reply.send(self.open_page(document, index));
                }
                Command::Render {
                    page,
                    width,
                    height,
                    reply,
                } => {
                    let _ = reply.send(self.render(page, width, height));
                }
                Command::ClosePage { page } => {
                    self.pages.remove(&page);
                }
                Command::CloseDocument { document } => {
                    // Pages must be released before their document
                    self.pages.retain(|_, (owner, _, _)| *owner != document);
                    self.documents.remove(&document);
                }
            }
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn open(&mut self, source: &ByteSource) -> RenderResult<(DocumentId, usize)> {
        let document = match source {
            ByteSource::File(path) => self.pdfium.load_pdf_from_file(path, None),
            ByteSource::Memory(bytes) => self.pdfium.load_pdf_from_byte_vec(bytes.to_vec(), None),
        }
        .map_err(|e| RenderError::OpenFailed(e.to_string()))?;

        let page_count = document.pages().len() as usize;
        let id = self.next_id();
        self.documents.insert(id, document);
        Ok((id, page_count))
    }

    fn open_page(&mut self, document: DocumentId, index: usize) -> RenderResult<(PageId, PageSize)> {
        let doc = self.documents.get(&document).ok_or(RenderError::DocumentClosed)?;
        let page_count = doc.pages().len() as usize;
        let page_index = u16::try_from(index).map_err(|_| RenderError::PageOutOfRange { index, page_count })?;

        let page = doc.pages().get(page_index).map_err(|e| RenderError::PageOpenFailed {
            index,
            reason: e.to_string(),
        })?;
        let size = PageSize::new(page.width().value.round() as u32, page.height().value.round() as u32);

        let id = self.next_id();
        self.pages.insert(id, (document, index, page));
        Ok((id, size))
    }

    fn render(&self, page: PageId, width: u32, height: u32) -> RenderResult<RenderedPage> {
        let (_, index, page) = self.pages.get(&page).ok_or(RenderError::DocumentClosed)?;
        let config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_target_height(height as i32);

        let bitmap = page.render_with_config(&config).map_err(|e| RenderError::RenderFailed {
            index: *index,
            reason: e.to_string(),
        })?;
        Ok(RenderedPage {
            pixels: bitmap.as_rgba_bytes(),
            width: bitmap.width() as usize,
            height: bitmap.height() as usize,
        })
    }
}

/// [`RasterBackend`] backed by a dynamically loaded PDFium library
pub struct PdfiumBackend {
    owner: Owner,
}

impl PdfiumBackend {
    /// Connect to the PDFium owner thread, binding the library on first use
    pub fn new() -> RenderResult<Self> {
        Ok(Self { owner: Owner::get()? })
    }
}

impl RasterBackend for PdfiumBackend {
    fn open(&self, source: &ByteSource) -> RenderResult<Box<dyn RasterDocument>> {
        let source = source.clone();
        let (id, page_count) = self
            .owner
            .call(|reply| Command::Open { source, reply })
            .unwrap_or_else(|| Err(RenderError::OpenFailed(OWNER_GONE.to_string())))?;

        Ok(Box::new(PdfiumDocument {
            owner: self.owner.clone(),
            id: Some(id),
            page_count,
        }))
    }
}

struct PdfiumDocument {
    owner: Owner,
    id: Option<DocumentId>,
    page_count: usize,
}

impl RasterDocument for PdfiumDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn open_page(&mut self, index: usize) -> RenderResult<Box<dyn RasterPage>> {
        let document = self.id.ok_or(RenderError::DocumentClosed)?;
        let (id, size) = self
            .owner
            .call(|reply| Command::OpenPage { document, index, reply })
            .unwrap_or_else(|| {
                Err(RenderError::PageOpenFailed {
                    index,
                    reason: OWNER_GONE.to_string(),
                })
            })?;

        Ok(Box::new(PdfiumPage {
            owner: self.owner.clone(),
            id: Some(id),
            index,
            size,
        }))
    }

    fn close(&mut self) -> RenderResult<()> {
        if let Some(document) = self.id.take() {
            self.owner.notify(Command::CloseDocument { document });
        }
        Ok(())
    }
}

impl Drop for PdfiumDocument {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct PdfiumPage {
    owner: Owner,
    id: Option<PageId>,
    index: usize,
    size: PageSize,
}

impl RasterPage for PdfiumPage {
    fn index(&self) -> usize {
        self.index
    }

    fn dimensions(&self) -> PageSize {
        self.size
    }

    fn render(&mut self, target: &mut PixelBuffer, clip: Option<ClipRect>) -> RenderResult<()> {
        let page = self.id.ok_or(RenderError::DocumentClosed)?;
        let (width, height) = (target.width(), target.height());
        let rendered = self
            .owner
            .call(|reply| Command::Render {
                page,
                width,
                height,
                reply,
            })
            .unwrap_or_else(|| {
                Err(RenderError::RenderFailed {
                    index: self.index,
                    reason: OWNER_GONE.to_string(),
                })
            })?;

        target.erase(PAPER_WHITE);
        let region = clip.unwrap_or(ClipRect {
            x: 0,
            y: 0,
            width,
            height,
        });
        copy_region(target, &rendered.pixels, rendered.width, rendered.height, region);
        Ok(())
    }

    fn close(&mut self) -> RenderResult<()> {
        if let Some(page) = self.id.take() {
            self.owner.notify(Command::ClosePage { page });
        }
        Ok(())
    }
}

impl Drop for PdfiumPage {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Copy `region` of an RGBA source image into the same region of `target`,
/// clamped to both images
fn copy_region(
    target: &mut PixelBuffer,
    source: &[u8],
    source_width: usize,
    source_height: usize,
    region: ClipRect,
) {
    let target_width = target.width() as usize;
    let target_height = target.height() as usize;
    let x0 = region.x as usize;
    let y0 = region.y as usize;
    let x1 = (x0 + region.width as usize).min(target_width).min(source_width);
    let y1 = (y0 + region.height as usize).min(target_height).min(source_height);
    if x0 >= x1 {
        return;
    }

    let stride = target.stride();
    let data = target.data_mut();
    for y in y0..y1 {
        let src = &source[(y * source_width + x0) * 4..(y * source_width + x1) * 4];
        let dst = &mut data[y * stride + x0 * 4..y * stride + x1 * 4];
        dst.copy_from_slice(src);
    }
}
