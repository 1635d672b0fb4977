//! The build planner.
//!
//! Per input package the planner resolves metadata, walks the source
//! tree, asks the oracle which artifacts are stale, and defers the
//! necessary compile/link/copy commands into the queue. Applications
//! recursively plan their consolidated dependencies first; a visited set
//! short-circuits diamond graphs.
//!
//! Planning never executes anything. Artifacts that will be produced get
//! a synthetic fresh timestamp so that later planning passes in the same
//! run see them as up to date.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::debug;
use walkdir::WalkDir;

use forge_platform::shell;

use crate::context::BuildContext;
use crate::metadata::{self, PackageMetadata, ResolveError};
use crate::placeholder::replace_first;
use crate::queue::{CommandQueue, DeferredCommand, Stage};
use crate::store;

/// Plans builds, remembering which packages it already handled.
#[derive(Debug, Default)]
pub struct Planner {
  planned: HashSet<String>,
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
  entry.file_name().to_string_lossy().starts_with('.')
}

fn join_quoted(paths: &[PathBuf]) -> String {
  paths.iter().map(|path| shell::quote(path)).collect::<Vec<_>>().join(" ")
}

impl Planner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Plans one package (and, for applications, its dependency closure).
  pub fn plan_package(
    &mut self,
    ctx: &mut BuildContext,
    queue: &mut CommandQueue,
    name: &str,
  ) -> Result<(), ResolveError> {
    if !self.planned.insert(name.to_string()) {
      return Ok(());
    }

    let metadata = metadata::resolve(ctx, name)?.clone();

    if metadata.should_skip {
      debug!(package = name, "package asks to be skipped");
      return Ok(());
    }

    // Dependent libraries link in an earlier stage, but their commands
    // still have to be planned before the application's.
    if metadata.is_application() {
      for dependency in &metadata.consolidated_dependencies {
        self.plan_package(ctx, queue, dependency)?;
      }
    }

    if let Some(destination) = &metadata.destination_directory {
      store::ensure_dir(destination);
    }

    if metadata.no_output_file {
      self.plan_assets(ctx, queue, &metadata);
      return Ok(());
    }

    self.register_package_placeholders(ctx, &metadata);

    let mut link_inputs: Vec<PathBuf> = Vec::new();
    let mut requires_linking = self.plan_sources(ctx, queue, &metadata, &mut link_inputs);

    // An existing output's timestamp gates the static-library check; a
    // missing output forces a link outright.
    let mut output_timestamp = 0;
    if !requires_linking && ctx.stamps.exists(&metadata.output_path) {
      output_timestamp = ctx.stamps.timestamp_of(&metadata.output_path);
    } else {
      requires_linking = true;
    }

    if metadata.is_application() && metadata.statically_link {
      for archive in &metadata.statically_linked_library_objects {
        link_inputs.push(archive.clone());
        if !requires_linking {
          let archive_timestamp = ctx.stamps.timestamp_of(archive);
          if archive_timestamp == 0
            || archive_timestamp > metadata.metadata_timestamp
            || archive_timestamp > output_timestamp
          {
            requires_linking = true;
          }
        }
      }
    }

    if metadata.is_library() {
      if let Some(shared) = &metadata.shared_library_path {
        if !ctx.stamps.exists(shared) {
          requires_linking = true;
        }
      }
      if let Some(archive) = &metadata.static_library_path {
        if !ctx.stamps.exists(archive) {
          requires_linking = true;
        }
      }
    }

    if requires_linking {
      self.plan_link(ctx, queue, &metadata, link_inputs);
    }

    self.plan_assets(ctx, queue, &metadata);
    Ok(())
  }

  fn register_package_placeholders(&self, ctx: &mut BuildContext, metadata: &PackageMetadata) {
    let cdefines = metadata
      .consolidated_defines
      .iter()
      .map(|define| format!("-D{define}"))
      .collect::<Vec<_>>()
      .join(" ");
    let cincludes = metadata
      .consolidated_includes
      .iter()
      .map(|include| format!("-I{}", shell::quote(include)))
      .collect::<Vec<_>>()
      .join(" ");

    ctx.placeholders.set("package name", metadata.name.clone());
    ctx.placeholders.set("cdefines", cdefines);
    ctx.placeholders.set("cincludes", cincludes);

    if metadata.is_application() {
      let shared_libraries = metadata
        .dynamically_linked_libraries
        .iter()
        .map(|library| format!("-l{library}"))
        .collect::<Vec<_>>()
        .join(" ");
      ctx.placeholders.set("shared_libraries", shared_libraries);
    }
  }

  /// Walks the source directories and enqueues a compile for every
  /// stale object. Returns whether anything was enqueued.
  fn plan_sources(
    &self,
    ctx: &mut BuildContext,
    queue: &mut CommandQueue,
    metadata: &PackageMetadata,
    link_inputs: &mut Vec<PathBuf>,
  ) -> bool {
    let objects_dir = ctx.layout.objects_dir(metadata.id);
    let mut enqueued_any = false;

    for source_directory in &metadata.source_directories {
      let root = metadata.package_path.join(source_directory);
      if !root.is_dir() {
        continue;
      }

      let walker = WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));
      for entry in walker.flatten() {
        if !entry.file_type().is_file() {
          continue;
        }
        let source = entry.path();
        if metadata.files_to_ignore.contains(source) {
          continue;
        }

        let Some(extension) = source.extension() else {
          continue;
        };
        let key = format!(".{}", extension.to_string_lossy());
        let Some(template) = metadata.build_commands.get(&key) else {
          continue;
        };

        let relative = source.strip_prefix(&metadata.package_path).unwrap_or(source);
        let mut object = objects_dir.join(relative).into_os_string();
        object.push(".o");
        let object = PathBuf::from(object);

        link_inputs.push(object.clone());

        if !ctx
          .oracle
          .is_stale(&mut ctx.stamps, metadata.id, metadata.metadata_timestamp, &object)
        {
          continue;
        }

        if let Some(parent) = object.parent() {
          store::ensure_dir(parent);
        }

        let mut command = template.clone();
        replace_first(&mut command, "${out}", &shell::quote(&object));
        replace_first(&mut command, "${in}", &shell::quote(source));
        ctx.placeholders.expand_in_place(&mut command);

        queue.push(
          Stage::Compile,
          DeferredCommand {
            command,
            source_file: Some(source.to_path_buf()),
            destination_file: Some(object.clone()),
            package_id: metadata.id,
          },
        );
        ctx.stamps.set_to_now(&object);
        enqueued_any = true;
      }
    }

    enqueued_any
  }

  fn plan_link(
    &self,
    ctx: &mut BuildContext,
    queue: &mut CommandQueue,
    metadata: &PackageMetadata,
    link_inputs: Vec<PathBuf>,
  ) {
    if metadata.is_application() {
      let mut command = metadata.linker_command.clone();
      replace_first(&mut command, "${out}", &shell::quote(&metadata.output_path));
      replace_first(&mut command, "${in}", &join_quoted(&link_inputs));
      ctx.placeholders.expand_in_place(&mut command);

      ctx.stamps.set_to_now(&metadata.output_path);
      queue.push(
        Stage::LinkApplication,
        DeferredCommand {
          command,
          source_file: None,
          destination_file: Some(metadata.output_path.clone()),
          package_id: metadata.id,
        },
      );
      return;
    }

    // Libraries produce three artifacts: the shared object, a copy of
    // it under the package's output filename, and the static archive.
    // The copy lands one stage after the link so it always copies the
    // freshly linked file.
    let objects = join_quoted(&link_inputs);

    if let Some(shared) = &metadata.shared_library_path {
      let mut command = metadata.shared_linker_command.clone();
      replace_first(&mut command, "${out}", &shell::quote(shared));
      replace_first(&mut command, "${in}", &objects);
      ctx.placeholders.expand_in_place(&mut command);

      ctx.stamps.set_to_now(shared);
      queue.push(
        Stage::LinkLibrary,
        DeferredCommand {
          command,
          source_file: None,
          destination_file: Some(shared.clone()),
          package_id: metadata.id,
        },
      );

      let copy = format!("cp {} {}", shell::quote(shared), shell::quote(&metadata.output_path));
      ctx.stamps.set_to_now(&metadata.output_path);
      queue.push(
        Stage::LinkApplication,
        DeferredCommand {
          command: copy,
          source_file: None,
          destination_file: Some(metadata.output_path.clone()),
          package_id: metadata.id,
        },
      );
    }

    if let Some(archive) = &metadata.static_library_path {
      let mut command = metadata.static_linker_command.clone();
      replace_first(&mut command, "${out}", &shell::quote(archive));
      replace_first(&mut command, "${in}", &objects);
      ctx.placeholders.expand_in_place(&mut command);

      ctx.stamps.set_to_now(archive);
      queue.push(
        Stage::LinkLibrary,
        DeferredCommand {
          command,
          source_file: None,
          destination_file: Some(archive.clone()),
          package_id: metadata.id,
        },
      );
    }
  }

  /// Copies asset directories verbatim into the destination directory,
  /// file by file, skipping anything already up to date.
  fn plan_assets(&self, ctx: &mut BuildContext, queue: &mut CommandQueue, metadata: &PackageMetadata) {
    let Some(destination) = &metadata.destination_directory else {
      return;
    };

    for asset_directory in &metadata.asset_directories {
      let root = metadata.package_path.join(asset_directory);
      if !root.is_dir() {
        continue;
      }

      for entry in WalkDir::new(&root).follow_links(false).into_iter().flatten() {
        if !entry.file_type().is_file() {
          continue;
        }
        let source = entry.path();
        let relative = source.strip_prefix(&root).unwrap_or(source);
        let target = destination.join(relative);

        let source_timestamp = ctx.stamps.timestamp_of(source);
        if source_timestamp <= ctx.stamps.timestamp_of(&target) {
          continue;
        }

        if let Some(parent) = target.parent() {
          store::ensure_dir(parent);
        }

        ctx.stamps.set_to_now(&target);
        queue.push(
          Stage::CopyAssets,
          DeferredCommand {
            command: format!("cp {} {}", shell::quote(source), shell::quote(&target)),
            source_file: Some(source.to_path_buf()),
            destination_file: Some(target),
            package_id: metadata.id,
          },
        );
      }
    }
  }
}

/// Enqueues the command that runs an application in the foreground.
pub fn plan_run(queue: &mut CommandQueue, metadata: &PackageMetadata) {
  queue.push(
    Stage::Run,
    DeferredCommand {
      command: shell::quote(&metadata.output_path),
      source_file: None,
      destination_file: None,
      package_id: metadata.id,
    },
  );
}

/// Enqueues the configured global run command, placeholder-expanded.
pub fn plan_global_run(ctx: &BuildContext, queue: &mut CommandQueue, template: &str) {
  queue.push(
    Stage::Run,
    DeferredCommand {
      command: ctx.placeholders.expand(template),
      source_file: None,
      destination_file: None,
      package_id: 0,
    },
  );
}
